fn main() {
    use docmodel_diagram::cli::parse;
    let cli = parse();
    docmodel_diagram::app::init_logging(&cli);
    let code = docmodel_diagram::app::run_cli(cli);
    if code != 0 {
        std::process::exit(code);
    }
}
