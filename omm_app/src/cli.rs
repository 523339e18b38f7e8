/// Config file path: the first command-line argument, or `default`
pub fn get_config_path(default: &str) -> String {
    config_path_from(std::env::args().skip(1), default)
}

/// Item names to open: every argument after the config path, or `default` when there are none
pub fn get_items(default: &[String]) -> Vec<String> {
    items_from(std::env::args().skip(2), default)
}

fn config_path_from(mut args: impl Iterator<Item = String>, default: &str) -> String {
    args.next().unwrap_or_else(|| default.to_string())
}

fn items_from(args: impl Iterator<Item = String>, default: &[String]) -> Vec<String> {
    let items: Vec<String> = args.map(|item| item.to_uppercase()).collect();
    if items.is_empty() {
        default.to_vec()
    } else {
        items
    }
}
