use std::collections::BTreeMap;
use std::path::Path;

use crate::CoreError;

pub type EnvMap = BTreeMap<String, String>;

/// Parses `KEY=VALUE` lines. Blank lines, `#` comments and lines without `=`
/// are skipped; an `export ` prefix and one pair of matching quotes around the
/// value are stripped.
pub fn parse_env(contents: &str) -> EnvMap {
    let mut out = EnvMap::new();
    for line in contents.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let trimmed = trimmed.strip_prefix("export ").unwrap_or(trimmed);
        let Some((key, value)) = trimmed.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        out.insert(key.to_string(), unquote(value.trim()).to_string());
    }
    out
}

fn unquote(value: &str) -> &str {
    for quote in ['"', '\''] {
        if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
            return &value[1..value.len() - 1];
        }
    }
    value
}

pub fn render_env(map: &EnvMap) -> String {
    let mut out = String::new();
    for (key, value) in map {
        out.push_str(key);
        out.push('=');
        out.push_str(value);
        out.push('\n');
    }
    out
}

/// Returns `None` when the file does not exist.
pub fn read_env_file(path: &Path) -> Result<Option<EnvMap>, CoreError> {
    match std::fs::read_to_string(path) {
        Ok(contents) => Ok(Some(parse_env(&contents))),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(CoreError::io("reading env file", err)),
    }
}

/// Replaces the file wholesale.
pub fn write_env_file(path: &Path, map: &EnvMap) -> Result<(), CoreError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|err| CoreError::io("creating env dir", err))?;
    }
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, render_env(map)).map_err(|err| CoreError::io("writing env file", err))?;
    std::fs::rename(&tmp, path).map_err(|err| CoreError::io("replacing env file", err))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_comments_quotes_and_values_with_equals() {
        let map = parse_env(
            "# defaults\n\nSERVER_NAME=\"HopHop Build server | Main\"\nexport RCON_HOST=localhost\nSERVER_LEVEL_URL=https://x/y?a=b\nbroken line\n",
        );

        assert_eq!(map.get("SERVER_NAME").map(String::as_str), Some("HopHop Build server | Main"));
        assert_eq!(map.get("RCON_HOST").map(String::as_str), Some("localhost"));
        assert_eq!(map.get("SERVER_LEVEL_URL").map(String::as_str), Some("https://x/y?a=b"));
        assert_eq!(map.len(), 3);
    }

    #[test]
    fn rendered_map_parses_back_identically() {
        let mut map = EnvMap::new();
        map.insert("SERVER_NAME".into(), "HopHop | Staging".into());
        map.insert("SERVER_PORT".into(), "28015".into());
        map.insert("APP_LISTENIP".into(), String::new());

        assert_eq!(parse_env(&render_env(&map)), map);
    }
}
