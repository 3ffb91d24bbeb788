use std::process::ExitCode;

fn main() -> ExitCode {
    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .format_target(false)
        .format_timestamp(None)
        .target(env_logger::Target::Stdout)
        .parse_default_env()
        .init();

    ExitCode::from(facegate::app::run(std::env::args_os()))
}
