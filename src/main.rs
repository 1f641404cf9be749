use std::process::ExitCode;

fn main() -> ExitCode {
    servitor::run_cli()
}
