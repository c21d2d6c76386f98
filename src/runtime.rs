use rayon::ThreadPoolBuilder;
use std::sync::Once;
use tracing_subscriber::EnvFilter;

struct ThreadConfig {
    count: usize,
    source: String,
}

fn parse_env_threads(keys: &[&str]) -> Option<ThreadConfig> {
    for &key in keys {
        if let Ok(v) = std::env::var(key) {
            if let Ok(val) = v.trim().parse::<usize>() {
                if val > 0 {
                    return Some(ThreadConfig {
                        count: val,
                        source: key.to_string(),
                    });
                }
            }
        }
    }
    None
}

fn detect_thread_config(explicit: Option<usize>) -> ThreadConfig {
    const ENV_HINTS: [&str; 6] = [
        "HHBBVV_THREADS",
        "RAYON_NUM_THREADS",
        "SLURM_CPUS_PER_TASK",
        "SLURM_CPUS_ON_NODE",
        "PBS_NP",
        "OMP_NUM_THREADS",
    ];

    if let Some(count) = explicit.filter(|&n| n > 0) {
        return ThreadConfig {
            count,
            source: "--threads".to_string(),
        };
    }
    if let Some(cfg) = parse_env_threads(&ENV_HINTS) {
        return cfg;
    }

    let fallback = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .max(1);

    ThreadConfig {
        count: fallback,
        source: "available_parallelism".to_string(),
    }
}

/// Size the global rayon pool once per process.
pub fn configure_thread_pool(explicit: Option<usize>) {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let cfg = detect_thread_config(explicit);
        match ThreadPoolBuilder::new()
            .num_threads(cfg.count)
            .thread_name(|i| format!("hhbbvv-worker-{i}"))
            .build_global()
        {
            Ok(_) => {
                tracing::info!(threads = cfg.count, hint = %cfg.source, "rayon pool configured");
            }
            Err(err) => {
                tracing::warn!(%err, "failed to configure rayon pool; continuing with default");
            }
        }
    });
}

/// `RUST_LOG` filter, `info` when unset. Logs go to stderr.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
