use anyhow::{Context, Result};
use cave_planner_core::{
    Action, Cave, Decision, DecisionRequest, Planner, SolverConfig, Terrain,
    config::{Algorithm, MovementModel},
    history::Event,
    simulator::CaveSimulator,
    skill::{SkillOdds, SkillPoints},
};
use clap::{Parser, ValueEnum};
use ratatui::{
    crossterm::{
        self,
        event::{self, DisableMouseCapture, EnableMouseCapture, Event as TermEvent, KeyCode},
        execute,
        terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
    },
    prelude::*,
    widgets::*,
};
use std::{
    io::{self, Stdout},
    path::PathBuf,
    time::{Duration, Instant},
};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum AlgorithmArg {
    /// Policy iteration
    Pi,
    /// Value iteration
    Vi,
}

#[derive(Parser, Debug)]
#[command(version, about = "Plans a way through a cave and watches an agent follow it", long_about = None)]
struct Args {
    /// Map file to load
    #[arg(short, long, value_name = "MAP_FILE")]
    map: Option<PathBuf>,

    /// JSON solver config; flags below override its fields
    #[arg(short, long, value_name = "CONFIG_FILE")]
    config: Option<PathBuf>,

    /// Discount factor
    #[arg(long)]
    gamma: Option<f64>,

    /// Let moves slip sideways
    #[arg(long)]
    stochastic: bool,

    #[arg(long, value_enum)]
    algorithm: Option<AlgorithmArg>,

    /// Seeds the simulator's dice and the initial policy
    #[arg(long, default_value_t = 0)]
    seed: u64,

    #[arg(long, default_value_t = 0)]
    agility: u32,

    #[arg(long, default_value_t = 0)]
    fighting: u32,

    /// Points the planner splits between agility and fighting before the first move
    #[arg(long, default_value_t = 12)]
    free_points: u32,

    /// Plan with the real dice odds instead of assuming every check succeeds
    #[arg(long)]
    skill_odds: bool,

    /// Give up after this many actions
    #[arg(long, default_value_t = 500)]
    max_steps: usize,

    /// Milliseconds between simulation steps
    #[arg(long, default_value_t = 250)]
    tick_ms: u64,

    /// Run without the terminal UI and print one line per decision
    #[arg(long)]
    headless: bool,
}

struct App {
    planner: Planner,
    simulator: CaveSimulator,
    map: String,
    history: Vec<Event>,
    last_action: Option<Action>,
    max_steps: usize,
    /// Flag to control the main loop.
    should_quit: bool,
    /// Flag to control if the episode is over.
    game_over: bool,
}

impl App {
    fn new(map: String, args: &Args) -> Result<Self> {
        let cave = Cave::parse(&map).context("Failed to load cave")?;
        let mut config = load_config(args)?;

        let mut skills = SkillPoints {
            agility: args.agility,
            fighting: args.fighting,
        };
        let mut planner = Planner::new(config.clone())?;
        if args.free_points > 0 {
            let request = DecisionRequest {
                map: map.clone(),
                skill_points: skills,
                free_skill_points: args.free_points,
                ..DecisionRequest::default()
            };
            if let Decision::Allocate(extra) = planner.decide(&request)? {
                skills.agility += extra.agility;
                skills.fighting += extra.fighting;
            }
        }
        if args.skill_odds {
            config.odds = SkillOdds::from_skill_points(skills);
            tracing::info!(bridge = config.odds.bridge, combat = config.odds.combat, "Planning with dice odds");
            planner = Planner::new(config.clone())?;
        }

        let simulator = CaveSimulator::new(cave, skills, config.movement, args.seed);
        let history = vec![simulator.opening_event()];
        Ok(App {
            planner,
            simulator,
            map,
            history,
            last_action: None,
            max_steps: args.max_steps,
            should_quit: false,
            game_over: false,
        })
    }

    /// Handles one step of the simulation.
    fn tick(&mut self) -> Result<()> {
        if self.game_over {
            return Ok(());
        }
        if self.simulator.steps() >= self.max_steps {
            tracing::warn!(steps = self.max_steps, "Step limit reached");
            self.game_over = true;
            return Ok(());
        }

        let request = DecisionRequest {
            map: self.map.clone(),
            history: self.history.clone(),
            skill_points: self.simulator.skills(),
            free_skill_points: 0,
        };
        let action = match self.planner.decide(&request)? {
            Decision::Act(action) => action,
            Decision::Allocate(_) => anyhow::bail!("Planner asked to allocate points mid-episode"),
        };
        let event = self.simulator.step(action);
        self.history.push(event);
        self.last_action = Some(action);
        if self.simulator.is_finished() {
            self.game_over = true;
        }
        Ok(())
    }

    /// Sets the quit flag.
    fn quit(&mut self) {
        self.should_quit = true;
    }

    fn summary(&self) -> String {
        let sim = &self.simulator;
        format!(
            "{} after {} steps: gold {}/{}, monsters defeated {}, reward {:.1}",
            if sim.is_finished() { "Exited" } else { "Stopped" },
            sim.steps(),
            sim.collected().len(),
            sim.cave().gold_positions().len(),
            sim.resolved().len(),
            sim.total_reward()
        )
    }
}

/// The solver config from `--config`, with command line overrides applied.
fn load_config(args: &Args) -> Result<SolverConfig> {
    let mut config = match &args.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            serde_json::from_str(&text)
                .with_context(|| format!("Failed to parse config file {}", path.display()))?
        }
        None => SolverConfig::default(),
    };
    if let Some(gamma) = args.gamma {
        config.gamma = gamma;
    }
    if args.stochastic {
        config.movement = MovementModel::Stochastic;
    }
    if let Some(algorithm) = args.algorithm {
        config.algorithm = match algorithm {
            AlgorithmArg::Pi => Algorithm::PolicyIteration,
            AlgorithmArg::Vi => Algorithm::ValueIteration,
        };
    }
    config.seed = args.seed;
    Ok(config)
}

/// Logs go to a file while the TUI owns the terminal, to stderr otherwise.
fn setup_logging(headless: bool) -> Result<Option<WorkerGuard>> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if headless {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
            .init();
        return Ok(None);
    }

    std::fs::create_dir_all("logs")?;
    let file_appender = tracing_appender::rolling::never("logs", "cave_planner.log");
    let (non_blocking_file, guard) = tracing_appender::non_blocking(file_appender);
    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking_file)
                .with_ansi(false),
        )
        .init();
    tracing::info!("Log file: logs/cave_planner.log");
    Ok(Some(guard))
}

fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();
    let _guard = setup_logging(args.headless)?;

    // If no map file is provided, use the default map
    let map_file = args.map.clone().unwrap_or(PathBuf::from("maps/cave01.txt"));
    let map = std::fs::read_to_string(&map_file)
        .with_context(|| format!("Failed to read map file {}", map_file.display()))?;

    let mut app = App::new(map, &args)?;

    if args.headless {
        return run_headless(&mut app);
    }

    let mut terminal = setup_terminal()?;
    let result = run_app(&mut terminal, &mut app, Duration::from_millis(args.tick_ms));
    restore_terminal(&mut terminal)?;
    result?;
    println!("{}", app.summary());
    Ok(())
}

fn run_headless(app: &mut App) -> Result<()> {
    while !app.game_over {
        let steps = app.simulator.steps();
        app.tick()?;
        if app.simulator.steps() == steps {
            continue;
        }
        if let (Some(action), Some(event)) = (app.last_action, app.history.last()) {
            let position = event
                .outcome
                .position
                .map_or_else(|| "-".to_string(), |position| position.to_string());
            println!("{:>4} {:<5} -> {}", app.simulator.steps(), action, position);
        }
    }
    println!("{}", app.summary());
    Ok(())
}

/// Configures the terminal for TUI interaction.
fn setup_terminal() -> Result<Terminal<CrosstermBackend<Stdout>>> {
    let mut stdout = io::stdout();
    enable_raw_mode()?;
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    Terminal::new(backend).map_err(Into::into)
}

/// Restores the terminal to its original state.
fn restore_terminal(terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> Result<()> {
    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;
    Ok(())
}

/// Runs the main loop of the TUI application.
fn run_app(
    terminal: &mut Terminal<CrosstermBackend<Stdout>>,
    app: &mut App,
    tick_rate: Duration,
) -> Result<()> {
    let mut last_tick = Instant::now();

    loop {
        terminal.draw(|f| ui(f, app))?;

        let timeout = tick_rate
            .checked_sub(last_tick.elapsed())
            .unwrap_or_else(|| Duration::from_secs(0));

        if crossterm::event::poll(timeout)? {
            if let TermEvent::Key(key) = event::read()? {
                match key.code {
                    KeyCode::Char('q') | KeyCode::Esc => app.quit(),
                    _ => {}
                }
            }
        }

        if last_tick.elapsed() >= tick_rate {
            app.tick()?;
            last_tick = Instant::now();
        }

        if app.should_quit {
            break;
        }
    }
    Ok(())
}

/// Renders the user interface.
fn ui(frame: &mut Frame, app: &App) {
    let main_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage(60), // Area for the map
            Constraint::Percentage(30), // Area for stats
            Constraint::Percentage(10), // Area for status/help
        ])
        .split(frame.area());

    render_map(frame, main_layout[0], &app.simulator);
    render_stats(frame, main_layout[1], app);

    let help = if app.game_over {
        format!("{}. Press 'q' or 'Esc' to quit.", app.summary())
    } else {
        "Press 'q' or 'Esc' to quit.".to_string()
    };
    let help_text = Paragraph::new(help)
        .alignment(Alignment::Center)
        .block(Block::default().borders(Borders::TOP));
    frame.render_widget(help_text, main_layout[2]);
}

/// Renders the agent's progress and the planner's last solve.
fn render_stats(frame: &mut Frame, area: Rect, app: &App) {
    let sim = &app.simulator;
    let skills = sim.skills();
    let last_action = app
        .last_action
        .map_or_else(|| "-".to_string(), |action| action.to_string());

    let mut lines = vec![
        format!(
            "Pos: {}  Steps: {}  Last action: {}",
            sim.position(),
            sim.steps(),
            last_action
        ),
        format!(
            "Gold: {}/{}  Monsters defeated: {}/{}  Reward: {:.1}",
            sim.collected().len(),
            sim.cave().gold_positions().len(),
            sim.resolved().len(),
            sim.cave().monster_positions().len(),
            sim.total_reward()
        ),
        format!(
            "Skills: agility {} fighting {}  Odds: bridge {:.2} combat {:.2}",
            skills.agility,
            skills.fighting,
            app.planner.config().odds.bridge,
            app.planner.config().odds.combat
        ),
    ];
    if let Some(planned) = app.planner.last_solve() {
        let report = &planned.solution.report;
        lines.push(format!(
            "Solve: {:?} over {} states, {} iterations, {} sweeps, converged: {}  Cached solves: {}",
            report.algorithm,
            planned.mdp.len(),
            report.iterations,
            report.sweeps,
            report.converged,
            app.planner.cached_solves()
        ));
    }

    let items: Vec<ListItem> = lines.into_iter().map(ListItem::new).collect();
    let stats_widget = List::new(items).block(Block::default().borders(Borders::ALL).title("Agent"));
    frame.render_widget(stats_widget, area);
}

/// Renders the cave onto the frame.
fn render_map(frame: &mut Frame, area: Rect, sim: &CaveSimulator) {
    let cave = sim.cave();
    let mut lines: Vec<Line> = Vec::with_capacity(cave.height());

    for (y, row) in cave.grid().rows().enumerate() {
        let mut spans: Vec<Span> = Vec::with_capacity(cave.width());
        for (x, cell) in row.iter().enumerate() {
            let position = cave_planner_core::Position::new(x, y);
            if position == sim.position() {
                spans.push(Span::styled("@", Style::default().fg(Color::Red).bold()));
                continue;
            }
            if cell.gold && !sim.collected().contains(position) {
                spans.push(Span::styled("G", Style::default().fg(Color::Yellow)));
                continue;
            }
            let (tile_char, tile_style) = match cell.terrain {
                Terrain::Open => (" ", Style::default()),
                Terrain::Wall => ("#", Style::default().fg(Color::DarkGray)),
                Terrain::Pit => ("O", Style::default().fg(Color::Magenta)),
                Terrain::Bridge => ("=", Style::default().fg(Color::Cyan)),
                Terrain::Monster if sim.resolved().contains(position) => {
                    ("x", Style::default().fg(Color::DarkGray))
                }
                Terrain::Monster => ("W", Style::default().fg(Color::Red)),
                Terrain::Entrance => ("S", Style::default().fg(Color::Green)),
            };
            spans.push(Span::styled(tile_char, tile_style));
        }
        lines.push(Line::from(spans));
    }

    let map_paragraph = Paragraph::new(lines)
        .block(Block::default().title("Cave").borders(Borders::ALL))
        .alignment(Alignment::Center);

    frame.render_widget(map_paragraph, area);
}
