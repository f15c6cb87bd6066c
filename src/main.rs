use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tracing::info;

use canopy_grf::{
    Data, Forest, ForestOptions, ForestPredictor, ForestTrainer, Prediction,
    SurvivalPredictionKind, instrumental_predictor, instrumental_trainer, probability_predictor,
    probability_trainer, quantile_predictor, quantile_trainer, rank_variables,
    regression_predictor, regression_trainer, survival_predictor, survival_trainer,
    variable_importance,
};
use canopy_io::{Table, TableReader};

#[derive(Parser)]
#[command(name = "canopy")]
#[command(about = "Generalized random forests with honest trees and confidence intervals")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// RNG seed for reproducibility
    #[arg(long, default_value_t = 42, global = true)]
    seed: u64,

    /// Enable verbose (debug-level) logging
    #[arg(long, global = true)]
    verbose: bool,

    /// Suppress all output except errors
    #[arg(long, global = true)]
    quiet: bool,

    /// Number of threads for parallel computation (defaults to all cores)
    #[arg(long, global = true)]
    threads: Option<usize>,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
enum Estimand {
    /// Conditional mean of the outcome
    Regression,
    /// Class probabilities of an integer-labelled outcome
    Probability,
    /// Conditional quantiles of the outcome
    Quantile,
    /// Local average treatment effect with an instrument
    Instrumental,
    /// Conditional average treatment effect (the treatment is its own instrument)
    Causal,
    /// Survival curve of a right-censored outcome
    Survival,
}

#[derive(ValueEnum, Debug, Clone, Copy)]
enum SurvivalKind {
    KaplanMeier,
    NelsonAalen,
}

impl From<SurvivalKind> for SurvivalPredictionKind {
    fn from(kind: SurvivalKind) -> Self {
        match kind {
            SurvivalKind::KaplanMeier => SurvivalPredictionKind::KaplanMeier,
            SurvivalKind::NelsonAalen => SurvivalPredictionKind::NelsonAalen,
        }
    }
}

/// Column roles and estimand settings shared by training and prediction.
#[derive(Args, Debug, Clone)]
struct EstimandArgs {
    /// What the forest estimates
    #[arg(long, value_enum)]
    estimand: Estimand,

    /// Name of the outcome column
    #[arg(long)]
    outcome: String,

    /// Name of the treatment column (instrumental, causal)
    #[arg(long)]
    treatment: Option<String>,

    /// Name of the instrument column (instrumental)
    #[arg(long)]
    instrument: Option<String>,

    /// Name of the event indicator column, positive when observed (survival)
    #[arg(long)]
    censor: Option<String>,

    /// Name of a per-row sample weight column
    #[arg(long)]
    weight: Option<String>,

    /// Name of a cluster label column; removed from the covariates
    #[arg(long)]
    cluster: Option<String>,

    /// Number of classes (probability)
    #[arg(long, default_value_t = 2)]
    num_classes: usize,

    /// Comma-separated quantiles (quantile)
    #[arg(long, value_delimiter = ',', default_values_t = [0.1, 0.5, 0.9])]
    quantiles: Vec<f64>,

    /// Weight of the reduced form in instrumental splits
    #[arg(long, default_value_t = 0.0)]
    reduced_form_weight: f64,

    /// Use the estimand-specific split rule instead of plain regression splits
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    stabilize_splits: bool,

    /// Survival curve estimator (survival)
    #[arg(long, value_enum, default_value = "kaplan-meier")]
    survival_kind: SurvivalKind,
}

/// Forest growth parameters.
#[derive(Args, Debug, Clone)]
struct ForestArgs {
    /// Number of trees (rounded up to a multiple of --ci-group-size)
    #[arg(long, default_value_t = 2000)]
    num_trees: usize,

    /// Trees per confidence-interval group (1 disables variance estimates)
    #[arg(long, default_value_t = 2)]
    ci_group_size: usize,

    /// Fraction of sampling units drawn per tree
    #[arg(long, default_value_t = 0.5)]
    sample_fraction: f64,

    /// Mean number of variables tried per split
    #[arg(long)]
    mtry: Option<usize>,

    /// Nodes at or below this size are not split
    #[arg(long, default_value_t = 5)]
    min_node_size: usize,

    /// Disable honest splitting
    #[arg(long, default_value_t = false)]
    no_honesty: bool,

    /// Fraction of each tree's sample used to place splits when honest
    #[arg(long, default_value_t = 0.5)]
    honesty_fraction: f64,

    /// Keep leaves left empty by honest repopulation
    #[arg(long, default_value_t = false)]
    keep_empty_leaves: bool,

    /// Minimum share of a node that each child must receive
    #[arg(long, default_value_t = 0.05)]
    alpha: f64,

    /// Penalty on unbalanced splits
    #[arg(long, default_value_t = 0.0)]
    imbalance_penalty: f64,

    /// Cap on rows drawn from each sampled cluster
    #[arg(long)]
    samples_per_cluster: Option<usize>,
}

#[derive(Subcommand)]
enum Command {
    /// Train a forest and save it
    Train {
        /// Path to the training CSV file
        #[arg(long)]
        data: PathBuf,

        /// Where to write the trained forest
        #[arg(long)]
        model: PathBuf,

        /// Print out-of-bag predictions for every training row
        #[arg(long, default_value_t = false)]
        oob: bool,

        /// Include variance estimates with the out-of-bag predictions
        #[arg(long, default_value_t = false)]
        variance: bool,

        #[command(flatten)]
        estimand: EstimandArgs,

        #[command(flatten)]
        forest: ForestArgs,
    },

    /// Predict new rows with a saved forest
    Predict {
        /// Path to the trained forest
        #[arg(long)]
        model: PathBuf,

        /// Path to the CSV the forest was trained on
        #[arg(long)]
        train: PathBuf,

        /// Path to the CSV of rows to predict
        #[arg(long)]
        data: PathBuf,

        /// Include variance estimates
        #[arg(long, default_value_t = false)]
        variance: bool,

        #[command(flatten)]
        estimand: EstimandArgs,
    },

    /// Rank covariates by depth-weighted split frequency
    Importance {
        /// Path to the trained forest
        #[arg(long)]
        model: PathBuf,

        /// Path to the CSV the forest was trained on (for column names)
        #[arg(long)]
        data: PathBuf,

        /// Name of the cluster label column used at training time
        #[arg(long)]
        cluster: Option<String>,

        /// Depth weights decay as depth^-exponent
        #[arg(long, default_value_t = 2.0)]
        decay_exponent: f64,

        /// Only splits above this depth are counted
        #[arg(long, default_value_t = 4)]
        max_depth: usize,
    },
}

// --- JSON stdout output structs ---

#[derive(Serialize)]
struct TrainOutput<'a> {
    estimand: Estimand,
    model: &'a Path,
    num_rows: usize,
    num_trees: usize,
    num_variables: usize,
    ci_group_size: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    oob_predictions: Option<Vec<Prediction>>,
}

#[derive(Serialize)]
struct PredictOutput {
    estimand: Estimand,
    num_rows: usize,
    model_num_trees: usize,
    predictions: Vec<Prediction>,
}

#[derive(Serialize)]
struct ImportanceOutput {
    decay_exponent: f64,
    max_depth: usize,
    variables: Vec<canopy_grf::RankedVariable>,
}

/// A training table with roles assigned and the covariate names kept.
struct LoadedData {
    data: Data,
    column_names: Vec<String>,
    clusters: Vec<usize>,
}

fn read_table(path: &Path, cluster: Option<&str>) -> Result<(Table, Vec<usize>)> {
    let mut table = TableReader::new(path)
        .read()
        .with_context(|| format!("failed to read {}", path.display()))?;
    let clusters = match cluster {
        Some(name) => cluster_labels(table.take_column(name)?)?,
        None => Vec::new(),
    };
    Ok((table, clusters))
}

fn cluster_labels(raw: Vec<f64>) -> Result<Vec<usize>> {
    raw.into_iter()
        .enumerate()
        .map(|(row, label)| {
            if label >= 0.0 && label.fract() == 0.0 {
                Ok(label as usize)
            } else {
                bail!("row {row} has cluster label {label}, expected a non-negative integer")
            }
        })
        .collect()
}

fn required(column: Option<&str>, flag: &str, estimand: Estimand) -> Result<()> {
    if column.is_none() {
        bail!("--{flag} is required for the {estimand:?} estimand");
    }
    Ok(())
}

fn load_training_data(path: &Path, args: &EstimandArgs) -> Result<LoadedData> {
    let (table, clusters) = read_table(path, args.cluster.as_deref())?;
    let column_names = table.column_names().to_vec();
    let index = |name: &str| table.column_index(name);

    let outcome = index(&args.outcome)?;
    let treatment = args.treatment.as_deref().map(index).transpose()?;
    let instrument = args.instrument.as_deref().map(index).transpose()?;
    let censor = args.censor.as_deref().map(index).transpose()?;
    let weight = args.weight.as_deref().map(index).transpose()?;

    let (num_rows, num_cols) = (table.num_rows(), table.num_cols());
    let mut data =
        Data::new(table.into_values(), num_rows, num_cols)?.with_outcome_index(outcome)?;
    match args.estimand {
        Estimand::Regression | Estimand::Probability | Estimand::Quantile => {}
        Estimand::Instrumental => {
            required(args.treatment.as_deref(), "treatment", args.estimand)?;
            required(args.instrument.as_deref(), "instrument", args.estimand)?;
        }
        Estimand::Causal => {
            required(args.treatment.as_deref(), "treatment", args.estimand)?;
        }
        Estimand::Survival => {
            required(args.censor.as_deref(), "censor", args.estimand)?;
        }
    }
    if let Some(column) = treatment {
        data = data.with_treatment_index(column)?;
        if args.estimand == Estimand::Causal {
            data = data.with_instrument_index(column)?;
        }
    }
    if let Some(column) = instrument {
        data = data.with_instrument_index(column)?;
    }
    if let Some(column) = censor {
        data = data.with_censor_index(column)?;
    }
    if let Some(column) = weight {
        data = data.with_weight_index(column)?;
    }

    Ok(LoadedData {
        data,
        column_names,
        clusters,
    })
}

/// Reorder the columns of `table` to the training layout. Role columns may
/// be absent and read as missing.
fn align_test_data(table: &Table, train: &LoadedData) -> Result<Data> {
    let disallowed = train.data.disallowed_split_variables();
    let mut sources = Vec::with_capacity(train.column_names.len());
    for (train_index, name) in train.column_names.iter().enumerate() {
        match table.column_index(name) {
            Ok(index) => sources.push(Some(index)),
            Err(_) if disallowed.contains(&train_index) => sources.push(None),
            Err(e) => return Err(e).context("prediction data lacks a training covariate"),
        }
    }
    let values = (0..table.num_rows())
        .flat_map(|row| {
            sources
                .iter()
                .map(move |source| source.map_or(f64::NAN, |col| table.get(row, col)))
        })
        .collect();
    Ok(Data::new(values, table.num_rows(), sources.len())?)
}

fn build_trainer(args: &EstimandArgs) -> Result<ForestTrainer> {
    let trainer = match args.estimand {
        Estimand::Regression => regression_trainer(),
        Estimand::Probability => probability_trainer(args.num_classes)?,
        Estimand::Quantile => quantile_trainer(args.quantiles.clone())?,
        Estimand::Instrumental | Estimand::Causal => {
            instrumental_trainer(args.reduced_form_weight, args.stabilize_splits)?
        }
        Estimand::Survival => survival_trainer(),
    };
    Ok(trainer)
}

fn build_predictor(args: &EstimandArgs, train: &Data, threads: usize) -> Result<ForestPredictor> {
    let predictor = match args.estimand {
        Estimand::Regression => regression_predictor(threads),
        Estimand::Probability => probability_predictor(threads, args.num_classes)?,
        Estimand::Quantile => quantile_predictor(threads, args.quantiles.clone())?,
        Estimand::Instrumental | Estimand::Causal => instrumental_predictor(threads),
        Estimand::Survival => survival_predictor(threads, train, args.survival_kind.into()),
    };
    Ok(predictor)
}

fn build_options(
    args: &ForestArgs,
    clusters: Vec<usize>,
    seed: u64,
    threads: usize,
) -> Result<ForestOptions> {
    Ok(ForestOptions::new(args.num_trees)?
        .with_ci_group_size(args.ci_group_size)
        .with_sample_fraction(args.sample_fraction)
        .with_mtry(args.mtry)
        .with_min_node_size(args.min_node_size)
        .with_honesty(!args.no_honesty)
        .with_honesty_fraction(args.honesty_fraction)
        .with_honesty_prune_leaves(!args.keep_empty_leaves)
        .with_alpha(args.alpha)
        .with_imbalance_penalty(args.imbalance_penalty)
        .with_samples_per_cluster(args.samples_per_cluster)
        .with_clusters(clusters)
        .with_num_threads(threads)
        .with_seed(seed))
}

fn print_json(value: &impl Serialize) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("failed to serialize output")?;
    println!("{json}");
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match (cli.verbose, cli.quiet) {
        (true, _) => "debug",
        (_, true) => "error",
        _ => "info",
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let threads = cli.threads.unwrap_or(0);

    match cli.command {
        Command::Train {
            data,
            model,
            oob,
            variance,
            estimand,
            forest,
        } => {
            let loaded = load_training_data(&data, &estimand)?;
            let options = build_options(&forest, loaded.clusters.clone(), cli.seed, threads)?;
            let trainer = build_trainer(&estimand)?;
            let trained = trainer
                .train(&loaded.data, &options)
                .context("forest training failed")?;
            trained
                .save(&model)
                .with_context(|| format!("failed to save forest to {}", model.display()))?;
            info!(path = %model.display(), "forest written");

            let oob_predictions = if oob {
                let predictor = build_predictor(&estimand, &loaded.data, threads)?;
                Some(
                    predictor
                        .predict_oob(&trained, &loaded.data, variance)
                        .context("out-of-bag prediction failed")?,
                )
            } else {
                None
            };

            print_json(&TrainOutput {
                estimand: estimand.estimand,
                model: &model,
                num_rows: loaded.data.num_rows(),
                num_trees: trained.num_trees(),
                num_variables: trained.num_variables(),
                ci_group_size: trained.ci_group_size(),
                oob_predictions,
            })?;
        }

        Command::Predict {
            model,
            train,
            data,
            variance,
            estimand,
        } => {
            let forest = Forest::load(&model)
                .with_context(|| format!("failed to load forest from {}", model.display()))?;
            let loaded = load_training_data(&train, &estimand)?;
            let (mut test_table, _) = read_table(&data, None)?;
            if let Some(name) = estimand.cluster.as_deref() {
                if test_table.column_index(name).is_ok() {
                    test_table.take_column(name)?;
                }
            }
            let test_data = align_test_data(&test_table, &loaded)?;

            let predictor = build_predictor(&estimand, &loaded.data, threads)?;
            let predictions = predictor
                .predict(&forest, &loaded.data, &test_data, variance)
                .context("prediction failed")?;

            print_json(&PredictOutput {
                estimand: estimand.estimand,
                num_rows: test_data.num_rows(),
                model_num_trees: forest.num_trees(),
                predictions,
            })?;
        }

        Command::Importance {
            model,
            data,
            cluster,
            decay_exponent,
            max_depth,
        } => {
            let forest = Forest::load(&model)
                .with_context(|| format!("failed to load forest from {}", model.display()))?;
            let (table, _) = read_table(&data, cluster.as_deref())?;
            if table.num_cols() != forest.num_variables() {
                bail!(
                    "{} has {} columns but the forest was trained on {}",
                    data.display(),
                    table.num_cols(),
                    forest.num_variables()
                );
            }
            let importance = variable_importance(&forest, decay_exponent, max_depth);
            let variables = rank_variables(&importance, table.column_names());
            print_json(&ImportanceOutput {
                decay_exponent,
                max_depth,
                variables,
            })?;
        }
    }

    Ok(())
}
