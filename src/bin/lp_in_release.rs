use lp_in_release::cli::{LpInRelease, LpInReleaseCommand};

fn main() {
    env_logger::init();
    let args: LpInRelease = argh::from_env();

    let result = match args.command {
        LpInReleaseCommand::List(cmd) => lp_in_release::cli::run_list(cmd),
        LpInReleaseCommand::Select(cmd) => lp_in_release::cli::run_select(cmd),
        LpInReleaseCommand::Inject(cmd) => lp_in_release::cli::run_inject(cmd),
    };

    if let Err(err) = result {
        eprintln!("lp-in-release: {err:#}");
        std::process::exit(1);
    }
}
