//! Integration tests for keg

mod cli_tests {
    use assert_cmd::{cargo::cargo_bin_cmd, Command};
    use predicates::prelude::*;
    use std::path::Path;
    use tempfile::TempDir;

    /// Isolated workspace: config file plus state directory, no network
    struct Env {
        dir: TempDir,
    }

    impl Env {
        fn new() -> Self {
            Self::with_manager("/nonexistent/keg-test/brew")
        }

        fn with_manager(manager: &str) -> Self {
            let dir = TempDir::new().unwrap();
            std::fs::write(
                dir.path().join("config.toml"),
                format!(
                    r#"
[catalog]
url = "http://127.0.0.1:9/formula.json"
connect_timeout_secs = 1
request_deadline_secs = 2

[packages]
manager = "{}"
command_timeout_secs = 10
"#,
                    manager
                ),
            )
            .unwrap();
            Self { dir }
        }

        fn state_dir(&self) -> std::path::PathBuf {
            self.dir.path().join("state")
        }

        fn keg(&self) -> Command {
            let mut cmd = cargo_bin_cmd!("keg");
            cmd.env("KEG_PLAIN", "1")
                .env_remove("KEG_CONFIG")
                .env_remove("KEG_STATE_DIR")
                .arg("--config")
                .arg(self.dir.path().join("config.toml"))
                .arg("--state-dir")
                .arg(self.state_dir());
            cmd
        }
    }

    #[test]
    fn help_displays() {
        cargo_bin_cmd!("keg")
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("Homebrew package state cache"));
    }

    #[test]
    fn version_displays() {
        cargo_bin_cmd!("keg")
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("keg"));
    }

    #[test]
    fn config_path_honors_flag() {
        let env = Env::new();
        env.keg()
            .args(["config", "path"])
            .assert()
            .success()
            .stdout(predicate::str::contains("config.toml"));
    }

    #[test]
    fn config_show_reflects_file() {
        let env = Env::new();
        env.keg()
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("[catalog]"))
            .stdout(predicate::str::contains("127.0.0.1:9"))
            .stdout(predicate::str::contains("ttl_secs = 3600"));
    }

    #[test]
    fn invalid_config_is_reported() {
        let env = Env::new();
        std::fs::write(env.dir.path().join("config.toml"), "[catalog\nurl=").unwrap();
        env.keg()
            .args(["config", "show"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Invalid configuration"));
    }

    #[test]
    fn catalog_info_without_catalog() {
        let env = Env::new();
        env.keg()
            .args(["catalog", "info"])
            .assert()
            .success()
            .stdout(predicate::str::contains("No local catalog"));
        assert!(env.state_dir().join("catalog").is_dir());
    }

    #[test]
    fn catalog_info_json_without_catalog() {
        let env = Env::new();
        env.keg()
            .args(["catalog", "info", "--format", "json"])
            .assert()
            .success()
            .stdout(predicate::str::contains(r#""present": false"#));
    }

    #[test]
    fn catalog_refresh_unreachable_upstream_fails() {
        let env = Env::new();
        env.keg()
            .args(["catalog", "refresh"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Catalog fetch failed"));

        // The failed check is recorded so the next call does not hammer upstream.
        let meta = std::fs::read_to_string(env.state_dir().join("catalog/meta.json")).unwrap();
        assert!(meta.contains("last_checked"));
    }

    #[test]
    fn catalog_search_without_catalog_fails_with_hint() {
        let env = Env::new();
        env.keg()
            .args(["catalog", "search", "wget"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Catalog not found"))
            .stderr(predicate::str::contains("keg catalog refresh"));
    }

    /// Writes a three-formula catalog into the state dir, returns its etag
    fn store_catalog(env: &Env) -> String {
        use keg::catalog::{build_catalog, CatalogMeta, CatalogStore};
        use tokio_util::sync::CancellationToken;

        let upstream = br#"[
            {"name":"wget","desc":"Internet file retriever","versions":{"stable":"1.24.5"}},
            {"name":"ripgrep","desc":"Search tool like grep","aliases":["rg"],"versions":{"stable":"14.1.0"}},
            {"name":"jq","desc":"Lightweight JSON processor","versions":{"stable":"1.7.1"}}
        ]"#;
        let mut blob = Vec::new();
        let built = build_catalog(&CancellationToken::new(), &upstream[..], &mut blob).unwrap();

        let now = chrono::Utc::now();
        let store = CatalogStore::open(env.state_dir().join("catalog"));
        store
            .write_index_gz(
                &mut &blob[..],
                &CatalogMeta {
                    etag: built.etag(),
                    generated_at: Some(built.generated_at),
                    count: built.count,
                    sha256: built.sha256.clone(),
                    last_success: Some(now),
                    last_checked: Some(now),
                    ..CatalogMeta::default()
                },
            )
            .unwrap();
        built.etag()
    }

    #[test]
    fn catalog_search_uses_stored_catalog() {
        let env = Env::new();
        let etag = store_catalog(&env);

        env.keg()
            .args(["catalog", "search", "grep", "--format", "plain"])
            .assert()
            .success()
            .stdout("ripgrep\n");

        env.keg()
            .args(["catalog", "search", "rg", "--exact", "--format", "json"])
            .assert()
            .success()
            .stdout(predicate::str::contains(r#""version": "14.1.0""#));

        env.keg()
            .args(["catalog", "info", "--format", "plain"])
            .assert()
            .success()
            .stdout(format!("{}\n", etag));
    }

    #[test]
    fn catalog_search_regex_and_fzf() {
        let env = Env::new();
        store_catalog(&env);

        env.keg()
            .args(["catalog", "search", "^(rg|jq)$", "--regex", "--format", "plain"])
            .assert()
            .success()
            .stdout("jq\nripgrep\n");

        env.keg()
            .args(["catalog", "search", "grep", "--fzf"])
            .assert()
            .success()
            .stdout("ripgrep\trg\tSearch tool like grep\n");

        env.keg()
            .args(["catalog", "search", "wget("])
            .arg("--regex")
            .assert()
            .failure()
            .stderr(predicate::str::contains("Invalid search pattern"));
    }

    #[test]
    fn catalog_search_table_shows_status_column() {
        let env = Env::new();
        store_catalog(&env);

        env.keg()
            .args(["catalog", "search", "wget"])
            .assert()
            .success()
            .stdout(predicate::str::contains("STATUS"))
            .stdout(predicate::str::contains("1 result(s)"));
    }

    #[test]
    fn state_show_degrades_without_package_manager() {
        let env = Env::new();
        env.keg()
            .args(["state", "show", "--format", "json"])
            .assert()
            .success()
            .stdout(predicate::str::contains("{}"));
    }

    #[test]
    fn state_refresh_without_package_manager_fails() {
        let env = Env::new();
        env.keg()
            .args(["state", "refresh"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Command failed"));
    }

    #[test]
    fn state_invalidate_succeeds_on_empty_cache() {
        let env = Env::new();
        env.keg()
            .args(["state", "invalidate"])
            .assert()
            .success()
            .stdout(predicate::str::contains("marked stale"));
    }

    #[cfg(unix)]
    fn fake_brew(dir: &Path) -> String {
        use std::os::unix::fs::PermissionsExt;

        let script = dir.join("brew");
        std::fs::write(
            &script,
            r#"#!/bin/sh
case "$1" in
  list) printf 'foo\nbar\n' ;;
  outdated) echo '{"formulae":[{"name":"foo","installed_versions":["1.0.0"],"current_version":"1.1.0"}],"casks":[]}' ;;
  *) echo "unexpected: $*" >&2; exit 1 ;;
esac
"#,
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        script.display().to_string()
    }

    #[cfg(unix)]
    #[test]
    fn state_refresh_with_package_manager() {
        let bin = TempDir::new().unwrap();
        let env = Env::with_manager(&fake_brew(bin.path()));

        env.keg()
            .args(["state", "refresh"])
            .assert()
            .success()
            .stdout(predicate::str::contains("2 installed, 1 outdated"));

        env.keg()
            .args(["state", "outdated", "--format", "plain"])
            .assert()
            .success()
            .stdout("foo\n");

        env.keg()
            .args(["state", "show", "foo", "--format", "json"])
            .assert()
            .success()
            .stdout(predicate::str::contains(r#""installed_version": "1.0.0""#))
            .stdout(predicate::str::contains(r#""latest_version": "1.1.0""#));

        assert!(env.state_dir().join("unified_cache.json").is_file());
    }
}
