use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use serde_json::json;
use tracing::info;

use supersugar::cli::{Cli, Command, StepArgs, TemplateArgs};
use supersugar::config::{Config, SinkKind};
use supersugar::{
    BatchImageLoader, BatchMode, CombinatorInputs, ControllerInputs, EventSink, ExhaustiveCombinationEngine, IndexMode,
    ImageWithTextSaver, JsonlSink, LoadRequest, LoopController, LoopNode, NullSink, QueueSink, SaveFormat, StepOutcome,
    StepStatus, TracingSink, generate,
};

fn setup_logging(cli_level: Option<&str>, config: &Config) -> Result<()> {
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("supersugar")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    // CLI level wins over config, INFO otherwise
    let level = cli_level.or(config.log_level.as_deref()).unwrap_or("info");
    let directive = level
        .parse::<tracing_subscriber::filter::Directive>()
        .context(format!("Invalid log level: {}", level))?;
    let log_file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_dir.join("sg.log"))
        .context("Failed to open log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(directive))
        .init();

    info!("Logging initialized (level: {})", level);
    Ok(())
}

/// Configured event sinks, plus `extra` when given
fn build_sinks(config: &Config, extra: Option<Box<dyn EventSink>>) -> Vec<Box<dyn EventSink>> {
    let mut sinks: Vec<Box<dyn EventSink>> = Vec::new();
    match config.notify.sink {
        SinkKind::Tracing => sinks.push(Box::new(TracingSink)),
        SinkKind::Jsonl => sinks.push(Box::new(JsonlSink::new(config.notify.events_path()))),
        SinkKind::None => sinks.push(Box::new(NullSink)),
    }
    sinks.extend(extra);
    sinks
}

fn combinator_inputs(args: &StepArgs, config: &Config) -> Result<CombinatorInputs> {
    let mut inputs = CombinatorInputs::new(&args.template.template)
        .with_start_index(args.start_index)
        .with_max_combinations(args.max_combinations.unwrap_or(config.engine.max_combinations))
        .with_auto_queue(config.engine.auto_queue && !args.no_auto_queue);
    inputs.pools = args.template.pool_inputs()?;
    if let Some(id) = &args.node_id {
        inputs = inputs.with_node_id(id);
    }
    Ok(inputs)
}

fn print_outcome(outcome: &StepOutcome) {
    println!("{}", outcome.prompt);
    let log = match outcome.status {
        StepStatus::Failed => outcome.log.red(),
        status if status.is_terminal() => outcome.log.yellow(),
        _ => outcome.log.normal(),
    };
    eprintln!("{}", log);
}

fn outcome_json(outcome: &StepOutcome) -> serde_json::Value {
    json!({
        "prompt": outcome.prompt,
        "log": outcome.log,
        "entry": outcome.entry.to_string(),
        "status": format!("{:?}", outcome.status),
        "index": outcome.index,
        "next_index": outcome.next_index,
        "total": outcome.total,
        "limit": outcome.limit,
        "continued": outcome.continued,
        "persisted": outcome.persisted,
    })
}

fn cmd_step(config: &Config, args: &StepArgs, as_json: bool) -> Result<()> {
    let inputs = combinator_inputs(args, config)?;
    let engine = ExhaustiveCombinationEngine::new(config.state.engine_store(args.state.as_ref()), build_sinks(config, None));
    let outcome = engine.compute(&inputs);
    if as_json {
        println!("{}", serde_json::to_string_pretty(&outcome_json(&outcome))?);
    } else {
        print_outcome(&outcome);
    }
    Ok(())
}

/// Drive the combinator the way a host would: re-run while a queue request is pending
fn cmd_run(config: &Config, args: &StepArgs, max_runs: Option<u64>) -> Result<()> {
    let mut inputs = combinator_inputs(args, config)?;
    let queue = Arc::new(QueueSink::new());
    let engine = ExhaustiveCombinationEngine::new(
        config.state.engine_store(args.state.as_ref()),
        build_sinks(config, Some(Box::new(Arc::clone(&queue)))),
    );

    let mut runs = 0u64;
    loop {
        let outcome = engine.compute(&inputs);
        runs += 1;
        println!("{}", outcome.prompt);
        if outcome.status == StepStatus::Failed {
            eprintln!("{}", outcome.log.red());
            break;
        }
        if !queue.take() {
            eprintln!("{}", outcome.log.yellow());
            break;
        }
        if max_runs.is_some_and(|max| runs >= max) {
            eprintln!("{} Stopped after {} runs", "!".yellow(), runs);
            break;
        }
        // Host mirrors the widget update into the next run's start index
        inputs.start_index = outcome.next_index;
    }

    info!(runs, "run: finished");
    eprintln!("{} {} runs", "✓".green(), runs);
    Ok(())
}

fn cmd_should_recompute(config: &Config, args: &StepArgs) -> Result<()> {
    let inputs = combinator_inputs(args, config)?;
    let engine = ExhaustiveCombinationEngine::new(config.state.engine_store(args.state.as_ref()), build_sinks(config, None));
    println!("{}", engine.should_recompute(&inputs));
    Ok(())
}

fn cmd_generate(config: &Config, template: &TemplateArgs, max_materialize: Option<u64>, as_json: bool) -> Result<()> {
    let pools = template.pool_inputs()?;
    let limit = max_materialize.unwrap_or(config.generator.max_materialize);
    let generated = generate(&template.template, &pools, limit)?;

    if as_json {
        let value = json!({
            "combos": generated.combos,
            "total": generated.total,
            "config_hash": generated.config_hash,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
    } else {
        for combo in &generated.combos {
            println!("{}", combo);
        }
        eprintln!("{} combinations, hash {}", generated.total, &generated.config_hash[..8]);
    }
    Ok(())
}

fn cmd_control(
    config: &Config,
    template: &TemplateArgs,
    mode: &str,
    start_index: u64,
    max_iterations: u64,
    state: Option<&PathBuf>,
) -> Result<()> {
    let mode: IndexMode = mode.parse()?;
    let generated = generate(&template.template, &template.pool_inputs()?, config.generator.max_materialize)?;
    let inputs = ControllerInputs::new(generated.combos, generated.config_hash)
        .with_mode(mode)
        .with_start_index(start_index)
        .with_max_iterations(max_iterations);

    let controller = LoopController::new(config.state.controller_store(state), build_sinks(config, None));
    print_outcome(&controller.compute(&inputs));
    Ok(())
}

fn cmd_load_image(config: &Config, request: &LoadRequest, print_marker: bool) -> Result<()> {
    if print_marker {
        println!("{}", BatchImageLoader::changed_marker(&request.dir));
        return Ok(());
    }

    let loaded = BatchImageLoader::persistent(&config.state.dir).load(request)?;
    println!("{}", loaded.filename);
    eprintln!(
        "{}x{} {:?} (#{} in {})",
        loaded.image.width(),
        loaded.image.height(),
        loaded.image.color(),
        loaded.index,
        request.dir.display()
    );
    Ok(())
}

fn cmd_save(image_path: PathBuf, text: &str, saver: ImageWithTextSaver) -> Result<()> {
    let image = image::open(&image_path).context(format!("Failed to open image {}", image_path.display()))?;
    let report = saver.save(&image, text)?;
    if report.is_complete() {
        println!("{} {}", "✓".green(), report);
    } else {
        println!("{} {}", "!".yellow(), report);
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    setup_logging(cli.log_level.as_deref(), &config).context("Failed to setup logging")?;

    info!(
        "sg loaded config: state-dir={}, sink={:?}",
        config.state.dir.display(),
        config.notify.sink
    );

    match cli.command {
        Command::Step { args, json } => cmd_step(&config, &args, json),
        Command::Run { args, max_runs } => cmd_run(&config, &args, max_runs),
        Command::ShouldRecompute { args } => cmd_should_recompute(&config, &args),
        Command::Generate {
            template,
            max_materialize,
            json,
        } => cmd_generate(&config, &template, max_materialize, json),
        Command::Control {
            template,
            mode,
            start_index,
            max_iterations,
            state,
        } => cmd_control(&config, &template, &mode, start_index, max_iterations, state.as_ref()),
        Command::LoadImage {
            dir,
            pattern,
            mode,
            index,
            seed,
            label,
            allow_rgba,
            print_marker,
        } => {
            let mut request = LoadRequest::new(dir);
            request.pattern = pattern;
            request.mode = mode.parse::<BatchMode>()?;
            request.index = index;
            request.seed = seed;
            request.label = label;
            request.allow_rgba = allow_rgba;
            cmd_load_image(&config, &request, print_marker)
        }
        Command::Save {
            image,
            text,
            output,
            prefix,
            delimiter,
            padding,
            format,
            text_extension,
        } => {
            let mut saver = ImageWithTextSaver::new(output);
            saver.prefix = prefix;
            saver.delimiter = delimiter;
            saver.padding = padding;
            saver.format = format.parse::<SaveFormat>()?;
            saver.text_extension = text_extension;
            cmd_save(image, &text, saver)
        }
    }
}
