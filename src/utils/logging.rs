use std::io::Write;

/// Initialise the `log` backend for the process.
///
/// `RUST_LOG` wins when set; otherwise this crate logs at `info` (or `debug`
/// with `verbose`) and dependencies at `warn`.
pub fn init(verbose: bool) {
    let default_filter = if verbose {
        "lumi_rail=debug,warn"
    } else {
        "lumi_rail=info,warn"
    };

    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .format(|buf, record| {
            writeln!(
                buf,
                "{} [{}] {}",
                chrono::Local::now().format("%H:%M:%S"),
                record.level(),
                record.args()
            )
        })
        .try_init();
}
