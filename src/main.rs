use anyhow::{Context, bail};
use clap::{Args, Parser, Subcommand};
use county2party::acquire::{self, CensusClient, Geography};
use county2party::pipeline::{self, Sources};
use county2party::{Config, County2party};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[clap(author, version, about)]
struct Opt {
    #[clap(subcommand)]
    command: Command,

    /// JSON run configuration; absent keys keep their defaults.
    #[clap(long, global = true)]
    config: Option<PathBuf>,

    /// Sets a custom logging filter, e.g. `county2party=debug`.
    #[clap(long, short, global = true, default_value = "info")]
    log: String,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Download ACS county estimates into a CSV cache.
    Fetch(FetchArgs),
    /// Train, evaluate and plot end to end.
    Run(RunArgs),
    /// Classify counties with a saved model.
    Predict(PredictArgs),
}

#[derive(Debug, Args)]
struct FetchArgs {
    #[clap(long, default_value = "counties.csv")]
    out: PathBuf,
    /// Two-digit state FIPS; all states when omitted.
    #[clap(long)]
    state: Option<String>,
    #[clap(long)]
    year: Option<u16>,
    #[clap(long, env = "CENSUS_API_KEY", hide_env_values = true)]
    api_key: Option<String>,
}

#[derive(Debug, Args)]
struct RunArgs {
    /// Counties CSV cache; fetched from the API when it does not exist.
    #[clap(long, default_value = "counties.csv")]
    counties: PathBuf,
    /// County presidential results CSV.
    #[clap(long)]
    results: PathBuf,
    /// County boundaries GeoJSON for the maps.
    #[clap(long)]
    geometry: Option<PathBuf>,
    #[clap(long)]
    out_dir: Option<PathBuf>,
    /// State code held out as the test region.
    #[clap(long)]
    holdout: Option<String>,
    #[clap(long)]
    seed: Option<u64>,
    #[clap(long)]
    trees: Option<usize>,
    #[clap(long)]
    folds: Option<usize>,
    #[clap(long, env = "CENSUS_API_KEY", hide_env_values = true)]
    api_key: Option<String>,
}

#[derive(Debug, Args)]
struct PredictArgs {
    #[clap(long, default_value = "model.msgpack")]
    model: PathBuf,
    #[clap(long, default_value = "counties.csv")]
    counties: PathBuf,
    /// Counties to classify; every county in the CSV when omitted.
    fips: Vec<String>,
    #[clap(long, default_value_t = 10)]
    top_features: usize,
}

fn load_config(path: Option<&Path>) -> anyhow::Result<Config> {
    match path {
        Some(path) => Config::from_json_file(path)
            .with_context(|| format!("failed to read config {path:?}")),
        None => Ok(Config::default()),
    }
}

fn fetch(mut config: Config, args: FetchArgs) -> anyhow::Result<()> {
    if let Some(year) = args.year {
        config.year = year;
    }
    let geography = match args.state {
        Some(state) => Geography::CountyIn(state),
        None => Geography::County,
    };
    println!("🌐 Fetching ACS {} estimates...", config.year);
    let client = CensusClient::new(args.api_key.or(config.api_key));
    let records = client.fetch(&acquire::default_variables(), &geography, config.year)?;
    acquire::write_counties_csv(&args.out, &records)
        .with_context(|| format!("failed to write {:?}", args.out))?;
    println!("💾 Saved {} counties to {:?}", records.len(), args.out);
    Ok(())
}

fn run(mut config: Config, args: RunArgs) -> anyhow::Result<()> {
    if let Some(out_dir) = args.out_dir {
        config.out_dir = out_dir;
    }
    if let Some(holdout) = args.holdout {
        config.holdout_region = holdout;
    }
    if let Some(seed) = args.seed {
        config.seed = seed;
    }
    if let Some(trees) = args.trees {
        config.n_trees = trees;
    }
    if let Some(folds) = args.folds {
        config.fold_count = folds;
    }
    if args.api_key.is_some() {
        config.api_key = args.api_key;
    }
    config.validate()?;

    let sources = Sources {
        counties: Some(args.counties),
        results: args.results,
        geometry: args.geometry,
    };
    println!("🧠 Training on counties outside {}...", config.holdout_region);
    let run = pipeline::run(&config, &sources)?;
    let best = &run.report.best;
    println!(
        "🎯 Best: mtry = {}, split rule = {:?}, min node size = {}",
        best.mtry, best.split_rule, best.min_node_size
    );
    let evaluation = &run.report.evaluation;
    println!(
        "✅ Test accuracy: {:.2}% over {} counties",
        evaluation.accuracy * 100.0,
        run.report.test_counties
    );
    if let Some(auc) = evaluation.auc {
        println!("📈 AUC: {auc:.3}");
    }
    run.classifier.show_top_features(10);

    println!("💾 Writing outputs to {:?}...", config.out_dir);
    pipeline::write_outputs(&config, &run)?;
    Ok(())
}

fn predict(args: PredictArgs) -> anyhow::Result<()> {
    println!("📦 Loading model from {:?}...", args.model);
    let model = County2party::load_from_file(&args.model)
        .with_context(|| format!("failed to load model {:?}", args.model))?;
    model.show_top_features(args.top_features);

    let wanted: BTreeSet<String> = args
        .fips
        .iter()
        .map(|f| county2party::record::pad_fips(f))
        .collect::<Result<_, _>>()?;
    let records = acquire::read_counties_csv(&args.counties)?;
    let selected: Vec<_> = records
        .iter()
        .filter(|r| wanted.is_empty() || wanted.contains(&r.fips))
        .collect();
    if selected.is_empty() {
        bail!("none of the requested counties is in {:?}", args.counties);
    }

    for record in selected {
        match model.predict_with_proba(record) {
            Ok((party, p_dem, p_rep)) => println!(
                "{} ({}) is classified as {} (P_dem = {:.2}%, P_rep = {:.2}%)",
                record.name,
                record.fips,
                party,
                p_dem * 100.0,
                p_rep * 100.0
            ),
            Err(e) => println!("⚠️ {} ({}): {e}", record.name, record.fips),
        }
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let Opt {
        command,
        config,
        log,
    } = Opt::parse();
    let filter = EnvFilter::from_default_env().add_directive(log.parse()?);
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = load_config(config.as_deref())?;
    match command {
        Command::Fetch(args) => fetch(config, args),
        Command::Run(args) => run(config, args),
        Command::Predict(args) => predict(args),
    }
}
