use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ndarray::Array1;
use std::path::{Path, PathBuf};

use hhbbvv::bdt::BdtInputs;
use hhbbvv::config::PipelineConfig;
use hhbbvv::event::{Sample, load_batch, save_batch};
use hhbbvv::histogram::{Binning, Hist1D, HistogramSet, control_variables, fill_samples, save_histograms};
use hhbbvv::pipeline::{gen_match, process_samples};
use hhbbvv::runtime;
use hhbbvv::weights::{DenseLookup2D, FINAL_WEIGHT, TriggerLookups};

const AUGMENTED_SUFFIX: &str = "_augmented";

#[derive(Parser)]
#[command(name = "hhbbvv")]
#[command(about = "HH -> bbVV fat-jet candidate assignment and derived features")]
#[command(version)]
struct Cli {
    /// JSON pipeline configuration; defaults are used when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[arg(long, global = true)]
    dr_threshold: Option<f64>,

    #[arg(long, global = true)]
    tagger_cut: Option<f64>,

    #[arg(long, global = true)]
    num_jet_slots: Option<usize>,

    /// Fail on events with a missing fat jet instead of flagging them.
    #[arg(long, global = true)]
    strict: bool,

    /// Worker threads (overrides HHBBVV_THREADS and scheduler hints).
    #[arg(long, global = true)]
    threads: Option<usize>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Assign candidates, add features and weights, write `<stem>_augmented.npz`.
    Process {
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        #[arg(short, long)]
        out_dir: Option<PathBuf>,

        #[arg(long, default_value = "100000")]
        batch_size: usize,

        #[arg(long, requires = "trig_eff_vv")]
        trig_eff_bb: Option<PathBuf>,

        #[arg(long, requires = "trig_eff_bb")]
        trig_eff_vv: Option<PathBuf>,
    },
    /// Truth-match the candidates of a signal sample and print the report.
    Genmatch {
        input: PathBuf,

        /// Also write deltaR histograms here.
        #[arg(long)]
        hist_out: Option<PathBuf>,
    },
    /// Fill the control histograms from augmented samples.
    Hists {
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        #[arg(short, long, default_value = "hists.npz")]
        out: PathBuf,
    },
    /// Build BDT training matrices from augmented samples.
    BdtInputs {
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        #[arg(short, long, default_value = "bdt_inputs.npz")]
        out: PathBuf,
    },
}

fn load_config(cli: &Cli) -> Result<PipelineConfig> {
    let mut cfg = match &cli.config {
        Some(path) => PipelineConfig::from_json_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => PipelineConfig::default(),
    };
    if let Some(v) = cli.dr_threshold {
        cfg.dr_threshold = v;
    }
    if let Some(v) = cli.tagger_cut {
        cfg.tagger_cut = v;
    }
    if let Some(v) = cli.num_jet_slots {
        cfg.num_jet_slots = v;
    }
    if cli.strict {
        cfg.reject_degenerate_events = true;
    }
    cfg.validate().context("invalid configuration")?;
    Ok(cfg)
}

fn sample_name(path: &Path) -> String {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("sample");
    stem.strip_suffix(AUGMENTED_SUFFIX).unwrap_or(stem).to_string()
}

fn load_samples(inputs: &[PathBuf]) -> Result<Vec<Sample>> {
    inputs
        .iter()
        .map(|path| {
            let batch = load_batch(path).with_context(|| format!("reading {}", path.display()))?;
            Ok(Sample::new(sample_name(path), batch))
        })
        .collect()
}

fn run_process(
    cfg: &PipelineConfig,
    inputs: &[PathBuf],
    out_dir: Option<&Path>,
    batch_size: usize,
    trig_eff: Option<(&Path, &Path)>,
) -> Result<()> {
    let lookups = match trig_eff {
        Some((bb, vv)) => Some(TriggerLookups {
            bb: DenseLookup2D::load(bb).with_context(|| format!("reading {}", bb.display()))?,
            vv: DenseLookup2D::load(vv).with_context(|| format!("reading {}", vv.display()))?,
        }),
        None => None,
    };

    let samples = load_samples(inputs)?;
    let (samples, sf) = process_samples(samples, cfg, batch_size, lookups.as_ref())?;
    if let Some(sf) = sf {
        tracing::info!(scale_factor = sf, "QCD scale factor");
    }

    for (sample, input) in samples.iter().zip(inputs) {
        let dir = out_dir
            .map(Path::to_path_buf)
            .or_else(|| input.parent().map(Path::to_path_buf))
            .unwrap_or_else(|| PathBuf::from("."));
        let out = dir.join(format!("{}{AUGMENTED_SUFFIX}.npz", sample.name));
        save_batch(&out, &sample.batch).with_context(|| format!("writing {}", out.display()))?;
        tracing::info!(sample = %sample.name, path = %out.display(), "wrote augmented sample");
    }
    Ok(())
}

fn run_genmatch(cfg: &PipelineConfig, input: &Path, hist_out: Option<&Path>) -> Result<()> {
    let batch = load_batch(input).with_context(|| format!("reading {}", input.display()))?;
    let matched = gen_match(&batch, cfg)?;
    println!("{}", serde_json::to_string_pretty(&matched.report)?);

    if let Some(path) = hist_out {
        let binning = Binning::new(50, 0.0, 5.0)?;
        let weights = batch
            .event_column(FINAL_WEIGHT)
            .or_else(|_| batch.event_column(&cfg.weight_field))?;
        let d = &matched.distances;
        let sel = &matched.selections;
        let every = Array1::from_elem(batch.n_events(), true);
        let overlap_bb = sel.overlap_and(&sel.bb_tagged);
        let overlap_vv = sel.overlap_and(&sel.vv_tagged);
        let overlap_bbvv = sel.overlap_and(&sel.bbvv_tagged());

        let mut sets = Vec::new();
        let mut add = |name: &str, values: &Array1<f64>, mask: &Array1<bool>| -> Result<()> {
            let mut h = Hist1D::new(binning);
            h.fill_masked(values, weights, mask)?;
            sets.push(HistogramSet {
                variable: name.to_string(),
                per_sample: vec![(sample_name(input), h)],
            });
            Ok(())
        };
        add("dR_genHVV_genHbb", &d.gen_hvv_gen_hbb, &every)?;
        add("dR_bbCand_VVLeading", &d.bb_vv_leading, &every)?;
        add("dR_bbCand_VVCand", &d.bb_vv_candidate, &every)?;
        for (name, values, own_cut) in [
            ("dR_genHbb_bbCand", &d.gen_hbb_bb_candidate, (&overlap_bb, "bbcut")),
            ("dR_genHVV_VVLeading", &d.gen_hvv_vv_leading, (&overlap_vv, "VVcut")),
            ("dR_genHVV_VVCand", &d.gen_hvv_vv_candidate, (&overlap_vv, "VVcut")),
        ] {
            add(name, values, &every)?;
            add(&format!("{name}_overlap"), values, &sel.overlap)?;
            add(&format!("{name}_overlap_{}", own_cut.1), values, own_cut.0)?;
            add(&format!("{name}_overlap_bbVVcut"), values, &overlap_bbvv)?;
        }
        save_histograms(path, &sets).with_context(|| format!("writing {}", path.display()))?;
    }
    Ok(())
}

fn main() -> Result<()> {
    runtime::init_tracing();
    let cli = Cli::parse();
    runtime::configure_thread_pool(cli.threads);
    let cfg = load_config(&cli)?;

    match &cli.command {
        Commands::Process {
            inputs,
            out_dir,
            batch_size,
            trig_eff_bb,
            trig_eff_vv,
        } => {
            let trig_eff = trig_eff_bb.as_deref().zip(trig_eff_vv.as_deref());
            run_process(&cfg, inputs, out_dir.as_deref(), *batch_size, trig_eff)?;
        }
        Commands::Genmatch { input, hist_out } => {
            run_genmatch(&cfg, input, hist_out.as_deref())?;
        }
        Commands::Hists { inputs, out } => {
            let samples = load_samples(inputs)?;
            let sets = fill_samples(&samples, &control_variables(), FINAL_WEIGHT)?;
            save_histograms(out, &sets).with_context(|| format!("writing {}", out.display()))?;
            tracing::info!(path = %out.display(), histograms = sets.len() * samples.len(), "wrote histograms");
        }
        Commands::BdtInputs { inputs, out } => {
            let samples = load_samples(inputs)?;
            let inputs = BdtInputs::assemble(&samples, &cfg.samples, &cfg.bdt)?;
            let split = inputs.split(cfg.bdt.test_fraction, cfg.bdt.seed);
            split.save(out).with_context(|| format!("writing {}", out.display()))?;
            tracing::info!(
                train = split.train.n_rows(),
                test = split.test.n_rows(),
                path = %out.display(),
                "wrote BDT inputs"
            );
        }
    }
    Ok(())
}
