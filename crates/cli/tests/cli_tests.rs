use clap::Parser;

use rcs_cli::{Cli, Command};
use rcs_session_core::FeatureKind;

const GLOBALS: [&str; 7] = [
    "rcs",
    "--proxy",
    "192.0.2.10:5060",
    "--identity",
    "sip:alice@ims.example.com",
    "--local",
    "127.0.0.1:5070",
];

fn parse(extra: &[&str]) -> Cli {
    let args: Vec<&str> = GLOBALS.iter().copied().chain(extra.iter().copied()).collect();
    Cli::try_parse_from(args).unwrap()
}

#[test]
fn call_builds_stack_config() {
    let cli = parse(&["--username", "alice-private", "--password", "secret", "call", "sip:bob@ims.example.com"]);
    assert_eq!(
        cli.command,
        Command::Call {
            target: "sip:bob@ims.example.com".into(),
            duration: 0
        }
    );
    assert_eq!(cli.command.session_kind(), Some(FeatureKind::VoiceCall));

    let config = cli.stack_config().unwrap();
    assert_eq!(config.outbound_proxy, "192.0.2.10:5060".parse().unwrap());
    assert_eq!(config.local_addr, "127.0.0.1:5070".parse().unwrap());
    assert_eq!(config.identity, "sip:alice@ims.example.com");
    assert_eq!(config.username.as_deref(), Some("alice-private"));
    assert_eq!(config.password.as_deref(), Some("secret"));
}

#[test]
fn global_options_follow_the_subcommand() {
    let cli = Cli::try_parse_from([
        "rcs",
        "chat",
        "sip:bob@ims.example.com",
        "--duration",
        "30",
        "--proxy",
        "192.0.2.10:5060",
        "--identity",
        "sip:alice@ims.example.com",
        "--json-logs",
    ])
    .unwrap();
    assert_eq!(cli.command.session_kind(), Some(FeatureKind::Chat));
    assert!(matches!(cli.command, Command::Chat { duration: 30, .. }));
    assert!(cli.json_logs);
    assert!(cli.logging_config().unwrap().json);
}

#[test]
fn subscribe_and_publish_options() {
    let cli = parse(&["subscribe", "sip:bob@ims.example.com", "--expires", "600", "--watchers"]);
    assert_eq!(
        cli.command,
        Command::Subscribe {
            target: "sip:bob@ims.example.com".into(),
            expires: Some(600),
            watchers: true
        }
    );
    assert_eq!(cli.command.session_kind(), None);

    let cli = parse(&["publish", "presence.xml"]);
    match cli.command {
        Command::Publish { file, content_type } => {
            assert_eq!(file.to_str(), Some("presence.xml"));
            assert_eq!(content_type, "application/pidf+xml");
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn message_defaults_to_plain_text() {
    let cli = parse(&["message", "sip:bob@ims.example.com", "hello there"]);
    assert_eq!(
        cli.command,
        Command::Message {
            target: "sip:bob@ims.example.com".into(),
            text: "hello there".into(),
            content_type: "text/plain".into()
        }
    );
}

#[test]
fn invalid_input_is_reported() {
    assert!(Cli::try_parse_from(["rcs", "--proxy", "not-an-address", "listen"]).is_err());
    assert!(Cli::try_parse_from(["rcs", "--proxy", "192.0.2.10:5060"]).is_err());

    let cli = parse(&["--log-level", "chatty", "listen"]);
    assert!(cli.logging_config().is_err());
}

#[test]
fn missing_proxy_is_a_config_error() {
    let cli = Cli::try_parse_from(["rcs", "--identity", "sip:alice@ims.example.com", "listen"]).unwrap();
    if cli.proxy.is_none() {
        assert!(cli.stack_config().is_err());
    }
}
