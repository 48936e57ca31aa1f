mod cli;

use anyhow::Context;
use clap::Parser;
use cli::Cli;
use gsched::config::load_config;
use gsched::core::simulator::Simulator;
use gsched::io;
use tracing_subscriber::EnvFilter;

fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_env("GSCHED_LOG")
        .unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = load_config(cli.config.as_ref()).context("loading configuration")?;
    let mut params = config.engine.to_params();
    if let Some(iter) = cli.iter {
        params.max_random_iter = iter;
    }

    let (jobs, resources, ttime, catalogue) = io::load_inputs(&cli.folder, cli.stochastic)
        .context("loading input tables")?;

    let mut simulator = Simulator::from_parts(
        jobs,
        resources,
        ttime,
        catalogue,
        params,
        cli.stochastic,
    );
    if !simulator.initialized() {
        anyhow::bail!("simulator not initialized: missing or empty input tables");
    }

    let mut schedule_name = format!("{}_schedule", cli.method);
    if cli.method.is_randomized() {
        schedule_name.push_str(&format!("_{}", cli.seed));
    }
    schedule_name.push_str(".csv");
    let results_dir = cli.folder.join("results");
    let schedule_path = results_dir.join(&schedule_name);

    if cli.simulation {
        let mut writer = io::ScheduleWriter::create(&schedule_path)?;
        let mut write_error = None;
        let totals = simulator.run(cli.method, cli.current_time, cli.seed, |solution, jobs| {
            if write_error.is_none() {
                if let Err(err) = writer.write_solution(solution, jobs) {
                    write_error = Some(err);
                }
            }
        });
        if let Some(err) = write_error {
            return Err(err.context("writing schedule rows"));
        }

        io::append_totals(
            &results_dir.join(io::TOTALS_FILE),
            cli.method,
            cli.seed,
            &totals,
        )?;
        tracing::info!(
            total_cost = totals.total_cost,
            total_tardiness = totals.total_tardiness,
            "simulation finished"
        );
        println!(
            "{}, {}, {}, {}, {}, {}, {}, {}",
            cli.method,
            cli.seed,
            totals.total_tardiness,
            totals.total_tardiness_cost,
            totals.total_node_cost,
            totals.total_gpu_cost,
            totals.total_energy_cost,
            totals.total_cost
        );
    } else {
        let solution = simulator
            .schedule_once(cli.method, cli.current_time, cli.seed)
            .context("no schedule produced")?;
        let mut writer = io::ScheduleWriter::create(&schedule_path)?;
        writer.write_solution(&solution, simulator.job_catalog())?;
        tracing::info!(
            first_finish = solution.first_finish_time(),
            path = %schedule_path.display(),
            "schedule written"
        );
    }

    Ok(())
}
