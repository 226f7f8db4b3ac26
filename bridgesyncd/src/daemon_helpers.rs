fn expand_with_home(value: &str, home: &std::path::Path) -> PathBuf {
    if value == "~" {
        return home.to_path_buf();
    }
    if let Some(rest) = value.strip_prefix("~/") {
        return home.join(rest);
    }
    PathBuf::from(value)
}

fn read_u64_env(name: &str, default: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(default)
}

fn read_bool_env(name: &str, default: bool) -> bool {
    std::env::var(name)
        .ok()
        .map(|value| {
            matches!(
                value.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            )
        })
        .unwrap_or(default)
}

fn read_list_env(name: &str) -> Vec<String> {
    std::env::var(name)
        .map(|value| parse_list(&value))
        .unwrap_or_default()
}

fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_aliases(value: &str) -> anyhow::Result<Vec<(String, String)>> {
    parse_list(value)
        .into_iter()
        .map(|pair| {
            let (local, remote) = pair
                .split_once('=')
                .with_context(|| format!("alias {pair:?} is not of the form Local=Remote"))?;
            let (local, remote) = (local.trim(), remote.trim());
            if local.is_empty() || remote.is_empty() {
                anyhow::bail!("alias {pair:?} has an empty side");
            }
            Ok((local.to_string(), remote.to_string()))
        })
        .collect()
}
