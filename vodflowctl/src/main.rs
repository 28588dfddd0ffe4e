use clap::Parser;

fn main() {
    let cli = vodflowctl::Cli::parse();
    vodflowctl::init_tracing(cli.verbose);
    if let Err(err) = vodflowctl::run(cli) {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}
