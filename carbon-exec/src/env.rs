//! Environment handed to user code.
//!
//! The child never inherits the server's environment. It receives a fixed
//! set of interpreter flags and, when the server has one, the `PATH`.

use std::collections::BTreeMap;

pub const PATH: &str = "PATH";

const FIXED_VARS: [(&str, &str); 2] = [("PYTHONUNBUFFERED", "1"), ("PYTHONIOENCODING", "utf-8")];

/// Reduce `ambient` to the minimal set of variables passed to the child.
pub fn sanitize_environment<I, K, V>(ambient: I) -> BTreeMap<String, String>
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: AsRef<str>,
{
    let mut env: BTreeMap<String, String> = FIXED_VARS
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

    if let Some((_, path)) = ambient
        .into_iter()
        .find(|(k, v)| k.as_ref() == PATH && !v.as_ref().is_empty())
    {
        env.insert(PATH.to_string(), path.as_ref().to_string());
    }

    env
}

/// [`sanitize_environment`] applied to the current process environment.
/// Entries that are not valid UTF-8 are skipped.
pub fn sanitized_process_environment() -> BTreeMap<String, String> {
    sanitize_environment(std::env::vars_os().filter_map(|(k, v)| {
        match (k.into_string(), v.into_string()) {
            (Ok(k), Ok(v)) => Some((k, v)),
            _ => None,
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ambient_variables_do_not_leak() {
        let env = sanitize_environment([
            ("HOME", "/root"),
            ("AWS_SECRET_ACCESS_KEY", "hunter2"),
            ("PYTHONPATH", "/opt/evil"),
            ("LD_PRELOAD", "/tmp/x.so"),
        ]);

        let keys: Vec<_> = env.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["PYTHONIOENCODING", "PYTHONUNBUFFERED"]);
        assert_eq!(env["PYTHONUNBUFFERED"], "1");
        assert_eq!(env["PYTHONIOENCODING"], "utf-8");
    }

    #[test]
    fn path_is_kept_when_present() {
        let env = sanitize_environment([("PATH", "/usr/bin:/bin"), ("USER", "nobody")]);
        assert_eq!(env.len(), 3);
        assert_eq!(env[PATH], "/usr/bin:/bin");
    }

    #[test]
    fn empty_path_is_dropped() {
        let env = sanitize_environment([("PATH", "")]);
        assert!(!env.contains_key(PATH));
        assert_eq!(env.len(), 2);
    }

    #[test]
    fn empty_ambient_environment() {
        let env = sanitize_environment(Vec::<(String, String)>::new());
        assert_eq!(env.len(), 2);
    }

    #[test]
    fn process_environment_only_has_documented_keys() {
        let env = sanitized_process_environment();
        for key in env.keys() {
            assert!(
                ["PATH", "PYTHONUNBUFFERED", "PYTHONIOENCODING"].contains(&key.as_str()),
                "unexpected key {key}"
            );
        }
        let has_path = std::env::var(PATH).map(|p| !p.is_empty()).unwrap_or(false);
        assert_eq!(env.contains_key(PATH), has_path);
    }
}
