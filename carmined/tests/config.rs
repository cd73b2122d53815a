use figment::Jail;

use carmine_common::Network;
use carminedlib::config::{load_config, CarminedConfig};
use carminedlib::error::IndexerError;

#[test]
// Validates loading a valid configuration via `load_config`, ensuring
// fields are parsed and `check_config` passes with a mocked cookie file.
fn deserialize_full_valid_config() {
    Jail::expect_with(|jail| {
        let cookie_file_name = "node.cookie";
        jail.create_file(cookie_file_name, "__cookie__:mock-token")?;

        let toml_str = format!(
            r#"
            node_listen_address = "127.0.0.1:18443"
            node_cookie_path = "{cookie_file_name}"
            node_user = "user"
            node_password = "password"
            rpc_timeout_secs = 20
            bus_capacity = 2048
            poll_interval_ms = 1500
            status_interval_secs = 30
            network = "regtest"
        "#
        );
        let config_path = jail.directory().join("carmined.toml");
        jail.create_file(&config_path, &toml_str)?;

        let config = load_config(&config_path).expect("valid config loads");
        assert_eq!(
            config.node_listen_address,
            "127.0.0.1:18443".parse().unwrap()
        );
        assert_eq!(
            config.node_cookie_path.as_deref(),
            Some(std::path::Path::new(cookie_file_name))
        );
        assert_eq!(config.node_user, Some("user".to_string()));
        assert_eq!(config.node_password, Some("password".to_string()));
        assert_eq!(config.rpc_timeout_secs, 20);
        assert_eq!(config.bus_capacity, 2048);
        assert_eq!(config.poll_interval_ms, 1500);
        assert_eq!(config.status_interval_secs, 30);
        assert_eq!(config.network, Network::Regtest);
        Ok(())
    });
}

#[test]
// Omitted keys fall back to the documented defaults.
fn partial_config_layers_over_defaults() {
    Jail::expect_with(|jail| {
        let config_path = jail.directory().join("carmined.toml");
        jail.create_file(
            &config_path,
            r#"
            network = "mainnet"
        "#,
        )?;

        let config = load_config(&config_path).expect("partial config loads");
        let defaults = CarminedConfig::default();
        assert_eq!(config.network, Network::Mainnet);
        assert_eq!(config.node_listen_address, defaults.node_listen_address);
        assert_eq!(config.rpc_timeout_secs, defaults.rpc_timeout_secs);
        assert_eq!(config.bus_capacity, defaults.bus_capacity);
        Ok(())
    });
}

#[test]
// An unknown network name is a configuration error, not a default.
fn invalid_network_is_rejected() {
    Jail::expect_with(|jail| {
        let config_path = jail.directory().join("carmined.toml");
        jail.create_file(
            &config_path,
            r#"
            network = "lunarnet"
        "#,
        )?;

        let result = load_config(&config_path);
        assert!(matches!(result, Err(IndexerError::ConfigError(_))));
        Ok(())
    });
}

#[test]
// Cookie auth requires the cookie file to exist at startup.
fn missing_cookie_file_is_rejected() {
    Jail::expect_with(|jail| {
        let config_path = jail.directory().join("carmined.toml");
        jail.create_file(
            &config_path,
            r#"
            node_cookie_path = "does_not_exist.cookie"
        "#,
        )?;

        let result = load_config(&config_path);
        assert!(matches!(result, Err(IndexerError::ConfigError(_))));
        Ok(())
    });
}

#[test]
// A zero RPC timeout would hang every call behind reqwest defaults.
fn zero_rpc_timeout_is_rejected() {
    Jail::expect_with(|jail| {
        let config_path = jail.directory().join("carmined.toml");
        jail.create_file(
            &config_path,
            r#"
            rpc_timeout_secs = 0
        "#,
        )?;

        let result = load_config(&config_path);
        assert!(matches!(result, Err(IndexerError::ConfigError(_))));
        Ok(())
    });
}

#[test]
// The node connection must stay on a private address.
fn public_node_address_is_rejected() {
    Jail::expect_with(|jail| {
        let config_path = jail.directory().join("carmined.toml");
        jail.create_file(
            &config_path,
            r#"
            node_listen_address = "8.8.8.8:18443"
        "#,
        )?;

        let result = load_config(&config_path);
        assert!(matches!(result, Err(IndexerError::ConfigError(_))));
        Ok(())
    });
}

#[test]
// A missing file is surfaced as a configuration error.
fn missing_config_file_is_rejected() {
    let result = load_config(std::path::Path::new("/definitely/not/here.toml"));
    assert!(matches!(result, Err(IndexerError::ConfigError(_))));
}
