use concord_rs::{cli, config, telemetry};

fn main() {
    let cli = cli::parse_from(std::env::args_os());
    let _telemetry_guard = init_tracing(cli.verbose);
    std::process::exit(cli::run(cli));
}

fn init_tracing(verbose: u8) -> telemetry::TelemetryGuard {
    let cfg = config::load_or_default();
    telemetry::init(telemetry::TelemetryConfig::new(verbose, cfg.logging))
}
