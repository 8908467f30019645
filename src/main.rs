#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::struct_excessive_bools)]

use std::io;
use std::time::{Duration, Instant};

use anyhow::Result;
use clap::Parser;
use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use log::info;
use rand::rngs::StdRng;
use rand::SeedableRng;
use ratatui::{backend::CrosstermBackend, Terminal};

use hplanning::planning::{FlatMcts, HierarchicalMcts, Planner, SearchParams};
use hplanning::simulation::experiment::{self, Results};
use hplanning::simulation::{Rooms, Simulator};
use hplanning::ui::{field::compute_field_grid, render::draw_ui};

/// Online planning experiments on the rooms domain.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Number of episodes
    #[arg(long, default_value_t = 10)]
    runs: usize,

    /// Step cap per episode
    #[arg(long, default_value_t = 200)]
    steps: usize,

    /// Simulations per action selection
    #[arg(long, default_value_t = 500)]
    num_simulations: usize,

    /// Search horizon
    #[arg(long, default_value_t = 60)]
    max_depth: usize,

    /// RNG seed
    #[arg(long, default_value_t = 0)]
    seed: u64,

    /// Use the flat POMCP planner instead of the hierarchy
    #[arg(long)]
    flat: bool,

    /// Select actions by posterior sampling (flat planner)
    #[arg(long)]
    thompson: bool,

    /// Subtask convergence exponent; 0 disables exit caching
    #[arg(long, default_value_t = 0)]
    converged: u32,

    /// Probability of replaying a cached exit once converged
    #[arg(long, default_value_t = 0.5)]
    cache_rate: f64,

    /// History suffix length for belief fingerprints
    #[arg(long)]
    memory_size: Option<usize>,

    /// Wall-clock budget per action in seconds
    #[arg(long)]
    timeout: Option<f64>,

    /// Action noise of the rooms domain
    #[arg(long, default_value_t = 0.2)]
    noise: f64,

    /// Planner diagnostic verbosity
    #[arg(long, default_value_t = 0)]
    verbose: u8,

    /// Watch a live episode in the terminal
    #[arg(long)]
    tui: bool,
}

impl Args {
    fn search_params(&self) -> SearchParams {
        SearchParams {
            verbose: self.verbose,
            max_depth: self.max_depth,
            num_simulations: self.num_simulations,
            num_start_states: 1,
            thompson_sampling: self.thompson,
            time_out_per_action: self.timeout,
            memory_size: self.memory_size,
            converged: self.converged,
            cache_rate: self.cache_rate,
            hplanning: !self.flat,
            action_abstraction: !self.flat,
            root_goal: 0,
            seed: self.seed,
            ..SearchParams::default()
        }
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let params = args.search_params();
    let rooms = Rooms::four_rooms(args.noise);

    if args.tui {
        run_tui(&rooms, &params)
    } else {
        run_headless(&rooms, &args, &params);
        Ok(())
    }
}

fn run_headless(rooms: &Rooms, args: &Args, params: &SearchParams) {
    let results = if args.flat {
        experiment::multi_run(rooms, args.runs, args.steps, args.seed, |seed| {
            FlatMcts::new(rooms.clone(), SearchParams { seed, ..params.clone() })
        })
    } else {
        experiment::multi_run(rooms, args.runs, args.steps, args.seed, |seed| {
            HierarchicalMcts::new(rooms.clone(), SearchParams { seed, ..params.clone() })
                .expect("rooms configuration is valid")
        })
    };

    report(&results);
}

fn report(results: &Results) {
    info!(
        "discounted return = {:.3} +- {:.3}",
        results.discounted_return.mean(),
        results.discounted_return.std_err()
    );
    info!(
        "undiscounted return = {:.3} +- {:.3}",
        results.undiscounted_return.mean(),
        results.undiscounted_return.std_err()
    );
    info!("time per action = {:.4}s", results.time_per_action.mean());
    info!(
        "explored nodes = {:.1} +- {:.1}, explored depth = {:.1} +- {:.1}",
        results.explored_nodes.mean(),
        results.explored_nodes.std_err(),
        results.explored_depth.mean(),
        results.explored_depth.std_err()
    );
}

fn run_tui(rooms: &Rooms, params: &SearchParams) -> Result<()> {
    // Setup Terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let res = run_app(&mut terminal, rooms, params, Duration::from_millis(150));

    // Restore Terminal
    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;

    if let Err(err) = res {
        println!("{err:?}");
    }

    Ok(())
}

fn run_app<B: ratatui::backend::Backend>(
    terminal: &mut Terminal<B>,
    rooms: &Rooms,
    params: &SearchParams,
    tick_rate: Duration,
) -> io::Result<()> {
    let mut rng = StdRng::seed_from_u64(params.seed ^ 0x5e_ed);
    let mut planner = HierarchicalMcts::new(rooms.clone(), params.clone())
        .expect("rooms configuration is valid");
    let mut state = rooms.create_start_state(&mut rng);

    let mut step = 0usize;
    let mut ret = 0.0;
    let mut discount = 1.0;
    let mut hud = String::from("planning...");
    let mut last_tick = Instant::now();

    loop {
        // 1. Plan and step the real domain
        if last_tick.elapsed() >= tick_rate {
            let action = planner.select_action();
            let outcome = rooms.step(&mut state, action, &mut rng);
            step += 1;
            ret += outcome.reward * discount;
            discount *= rooms.discount();

            hud = format!(
                "Step: {step} | Act: {action} | Obs: {} | Ret: {ret:.2} | Nodes: {} | Depth: {}",
                outcome.observation,
                planner.tree_size(),
                planner.tree_depth()
            );

            if outcome.terminal {
                // Start a fresh episode
                planner = HierarchicalMcts::new(rooms.clone(), params.clone())
                    .expect("rooms configuration is valid");
                state = rooms.create_start_state(&mut rng);
                step = 0;
                ret = 0.0;
                discount = 1.0;
            } else {
                planner.update(action, outcome.observation, &state);
            }
            last_tick = Instant::now();
        }

        // 2. Render
        terminal.draw(|f| {
            let mut grid = compute_field_grid(rooms, &planner.root_samples());

            // Overlay the agent
            if let Some(line) = grid.get_mut(state.y) {
                if state.x < line.len() {
                    line.replace_range(state.x..=state.x, "A");
                }
            }

            draw_ui(f, grid, &hud);
        })?;

        // 3. Input
        let timeout = tick_rate
            .checked_sub(last_tick.elapsed())
            .unwrap_or_else(|| Duration::from_secs(0));

        if event::poll(timeout)? {
            if let Event::Key(key) = event::read()? {
                if key.code == KeyCode::Char('q') {
                    return Ok(());
                }
            }
        }
    }
}
