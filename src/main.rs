fn main() {
    env_logger::init();
    let matches = powerqa::cli::parse_args();

    match powerqa::cli::actions::run(&matches) {
        Ok(true) => {}
        Ok(false) => {
            log::info!("Board did not pass");
            std::process::exit(1);
        }
        Err(err) => {
            eprintln!("Error: {err:#}");
            std::process::exit(2);
        }
    }
}
