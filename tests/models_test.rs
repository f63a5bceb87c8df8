//! Tests for subscription models

use subkeeper::models::derive_name;
use subkeeper::Subscription;

#[test]
fn test_name_derivation_ignores_query_string() {
    let urls = [
        "https://example.com/api/v1/client/subscribe",
        "https://example.com/link/abcdef.yaml",
        "http://10.0.0.1:8080/sub",
    ];

    for url in urls {
        let with_query = format!("{url}?token=abc&flag=clash");
        assert_eq!(derive_name(url), derive_name(&with_query), "{url}");
        assert!(derive_name(url).is_some());
    }
}

#[test]
fn test_normalize_derives_missing_name() {
    let mut sub = Subscription::new("", "https://example.com/client/sub.yaml?token=1");
    sub.normalize();
    assert_eq!(sub.name, "sub.yaml");
}

#[test]
fn test_subscription_round_trips_through_yaml() {
    let sub = Subscription::new("work", "https://example.com/sub")
        .with_cron("0 */6 * * *")
        .with_header("Authorization=Bearer x");

    let yaml = serde_yaml::to_string(&sub).unwrap();
    assert!(!yaml.contains("method"));
    assert!(!yaml.contains("last_updated"));

    let parsed: Subscription = serde_yaml::from_str(&yaml).unwrap();
    assert_eq!(parsed, sub);
}
