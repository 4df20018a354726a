use std::process::ExitCode;

fn main() -> ExitCode {
    ExitCode::from(embedder::cli::run())
}
