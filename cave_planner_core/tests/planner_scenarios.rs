use cave_planner_core::{
    Action, Cave, Decision, DecisionRequest, Planner, Position, PositionSet, SolverConfig, State,
    config::{Algorithm, MovementModel},
    history::{EpisodeState, Event},
    model::TransitionModel,
    simulator::CaveSimulator,
    skill::{SkillOdds, SkillPoints},
    solver::{CaveMdp, PolicyIteration, Solver, ValueIteration},
};

fn p(x: usize, y: usize) -> Position {
    Position::new(x, y)
}

fn state(position: Position, collected: &[Position], resolved: &[Position]) -> State {
    State::new(
        position,
        collected.iter().copied().collect(),
        resolved.iter().copied().collect(),
    )
}

/// Drives `sim` with `planner` through decision requests until the agent
/// exits or `max_steps` actions have been taken.
fn run_episode(planner: &mut Planner, sim: &mut CaveSimulator, map: &str, max_steps: usize) -> Vec<Event> {
    let mut history = vec![sim.opening_event()];
    while !sim.is_finished() && sim.steps() < max_steps {
        let request = DecisionRequest {
            map: map.to_string(),
            history: history.clone(),
            skill_points: sim.skills(),
            free_skill_points: 0,
        };
        let Decision::Act(action) = planner.decide(&request).unwrap() else {
            panic!("expected an action");
        };
        history.push(sim.step(action));
    }
    history
}

#[test]
fn test_open_grid_collects_adjacent_gold_then_exits() {
    let cave = Cave::parse("SG.\n...\n...").unwrap();
    let config = SolverConfig {
        gamma: 0.95,
        movement: MovementModel::Deterministic,
        ..SolverConfig::default()
    };
    let mdp = CaveMdp::build(&cave, &config, &PositionSet::new()).unwrap();
    let solution = PolicyIteration::new(&config).solve(&mdp);
    let policy = &solution.policy;
    let gold = p(1, 0);

    assert_eq!(policy.action(&state(p(0, 0), &[], &[])), Some(Action::East));
    assert_eq!(policy.action(&state(gold, &[gold], &[])), Some(Action::West));
    assert_eq!(policy.action(&state(p(0, 0), &[gold], &[])), Some(Action::Exit));
    // EXIT is never chosen before the gold is in hand.
    assert!(
        policy
            .iter()
            .filter(|(s, _)| s.collected.is_empty())
            .all(|(_, action)| action != Action::Exit)
    );
}

#[test]
fn test_fights_a_monster_blocking_the_only_path() {
    let map = "XXXXX\nXSWGX\nXXXXX";
    let cave = Cave::parse(map).unwrap();
    let monster = p(2, 1);

    let mut odds = vec![SkillOdds::default()];
    for fighting in 3..=6 {
        odds.push(SkillOdds::from_skill_points(SkillPoints { agility: 0, fighting }));
    }
    for odds in odds {
        let config = SolverConfig {
            odds,
            ..SolverConfig::default()
        };
        let mdp = CaveMdp::build(&cave, &config, &PositionSet::new()).unwrap();
        let solution = PolicyIteration::new(&config).solve(&mdp);
        assert_eq!(
            solution.policy.action(&state(monster, &[], &[])),
            Some(Action::Fight),
            "combat odds {}",
            odds.combat
        );
        assert_eq!(
            solution.policy.action(&state(monster, &[], &[monster])),
            Some(Action::East)
        );
    }
}

#[test]
fn test_exit_on_a_map_without_gold() {
    let map = "S..";
    let cave = Cave::parse(map).unwrap();
    let config = SolverConfig::default();
    let model = TransitionModel::new(&cave, &config);
    let start = state(p(0, 0), &[], &[]);
    assert_eq!(model.reward(&start, Action::Exit, &start), config.rewards.step);

    let mut planner = Planner::new(config).unwrap();
    let mut sim = CaveSimulator::new(cave, SkillPoints::default(), MovementModel::Deterministic, 1);
    let history = run_episode(&mut planner, &mut sim, map, 10);
    assert!(sim.is_finished());
    assert_eq!(history.len(), 2);
    assert_eq!(history[1].action, Some(Action::Exit));
}

#[test]
fn test_policy_and_value_iteration_agree() {
    let cave = Cave::parse("XXXXXX\nXS.B.X\nX.W.GX\nXG...X\nXXXXXX").unwrap();
    for movement in [MovementModel::Deterministic, MovementModel::Stochastic] {
        let config = SolverConfig {
            movement,
            odds: SkillOdds {
                bridge: 0.7,
                combat: 0.4,
            },
            ..SolverConfig::default()
        };
        let mdp = CaveMdp::build(&cave, &config, &PositionSet::new()).unwrap();
        let pi = PolicyIteration::new(&config).solve(&mdp);
        let vi = ValueIteration::new(&config).solve(&mdp);
        assert!(pi.report.converged);
        assert!(vi.report.converged);
        assert_eq!(vi.report.algorithm, Algorithm::ValueIteration);
        assert!(
            pi.values.max_difference(&vi.values) < 1e-3,
            "{movement:?}: values differ by {}",
            pi.values.max_difference(&vi.values)
        );

        // Where the policies differ the chosen actions are worth the same.
        for (index, (s, pi_action)) in pi.policy.iter().enumerate() {
            let vi_action = vi.policy.as_slice()[index];
            if pi_action != vi_action {
                let a = mdp.q_value(s, pi_action, &vi.values).unwrap();
                let b = mdp.q_value(s, vi_action, &vi.values).unwrap();
                assert!((a - b).abs() < 1e-3, "{s:?}: {pi_action} vs {vi_action}");
            }
        }
    }
}

#[test]
fn test_resolving_a_converged_policy_changes_nothing() {
    let cave = Cave::parse("XXXXXX\nXS.B.X\nX.W.GX\nXG...X\nXXXXXX").unwrap();
    let config = SolverConfig {
        movement: MovementModel::Stochastic,
        ..SolverConfig::default()
    };
    let mdp = CaveMdp::build(&cave, &config, &PositionSet::new()).unwrap();
    let solver = PolicyIteration::new(&config);
    let first = solver.solve(&mdp);
    assert!(first.report.converged);

    let again = solver.solve_from(&mdp, first.policy.clone(), first.values.clone());
    assert!(again.report.converged);
    assert_eq!(again.report.iterations, 1);
    assert_eq!(again.report.last_changes, 0);
    assert_eq!(again.policy.differences(&first.policy), 0);
}

#[test]
fn test_full_episode_with_hazards() {
    let map = "XXXXXX\nXS.BGX\nX.XX.X\nX.W.GX\nXXXXXX";
    let cave = Cave::parse(map).unwrap();
    let mut planner = Planner::new(SolverConfig::default()).unwrap();

    let allocation = planner
        .decide(&DecisionRequest {
            map: map.to_string(),
            free_skill_points: 40,
            ..DecisionRequest::default()
        })
        .unwrap();
    let Decision::Allocate(skills) = allocation else {
        panic!("expected an allocation, got {allocation:?}");
    };
    assert_eq!(skills, SkillPoints { agility: 20, fighting: 20 });

    let mut sim = CaveSimulator::new(cave.clone(), skills, MovementModel::Deterministic, 2024);
    let history = run_episode(&mut planner, &mut sim, map, 200);
    assert!(sim.is_finished());
    assert_eq!(sim.collected().len(), cave.gold_positions().len());
    assert_eq!(history.last().and_then(|event| event.action), Some(Action::Exit));

    let episode = EpisodeState::replay(&cave, &history);
    assert_eq!(episode.position, cave.start());
    assert!(episode.remaining_gold(&cave).is_empty());
}

#[test]
fn test_replayed_sets_never_shrink() {
    let map = "SWG\n.B.\nG..";
    let cave = Cave::parse(map).unwrap();
    let mut planner = Planner::new(SolverConfig::default()).unwrap();
    let skills = SkillPoints {
        agility: 4,
        fighting: 4,
    };
    let mut sim = CaveSimulator::new(cave.clone(), skills, MovementModel::Stochastic, 99);
    let history = run_episode(&mut planner, &mut sim, map, 300);

    let mut previous = EpisodeState::initial(&cave);
    for end in 1..=history.len() {
        let episode = EpisodeState::replay(&cave, &history[..end]);
        assert!(previous.collected.is_subset(&episode.collected));
        assert!(previous.resolved.is_subset(&episode.resolved));
        previous = episode;
    }
}

#[test]
fn test_stochastic_episode_finishes() {
    let map = "S.G\n...\nG..";
    let cave = Cave::parse(map).unwrap();
    let config = SolverConfig {
        movement: MovementModel::Stochastic,
        algorithm: Algorithm::ValueIteration,
        ..SolverConfig::default()
    };
    let mut planner = Planner::new(config).unwrap();
    for seed in 0..5 {
        let mut sim = CaveSimulator::new(cave.clone(), SkillPoints::default(), MovementModel::Stochastic, seed);
        run_episode(&mut planner, &mut sim, map, 500);
        assert!(sim.is_finished(), "seed {seed}");
        assert_eq!(sim.collected().len(), 2, "seed {seed}");
    }
    assert_eq!(planner.cached_solves(), 1);
}

#[test]
fn test_long_corridor_gold_is_fetched_and_the_episode_ends() {
    let map = format!("S{}G", ".".repeat(60));
    let cave = Cave::parse(&map).unwrap();
    let mut planner = Planner::new(SolverConfig::default()).unwrap();
    let mut sim = CaveSimulator::new(cave, SkillPoints::default(), MovementModel::Deterministic, 0);

    let history = run_episode(&mut planner, &mut sim, &map, 400);
    assert!(sim.is_finished(), "stopped after {} steps", sim.steps());
    assert_eq!(sim.collected().len(), 1);
    // Straight there and straight back.
    assert_eq!(sim.steps(), 61 + 61 + 1);
    assert_eq!(history.last().and_then(|event| event.action), Some(Action::Exit));
}
