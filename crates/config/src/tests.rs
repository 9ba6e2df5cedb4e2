use super::*;
use std::collections::HashMap;

fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    move |key| map.get(key).cloned()
}

#[test]
fn defaults_when_nothing_is_set() {
    let cfg = AggregationConfig::from_lookup(lookup_from(&[])).unwrap();
    assert_eq!(cfg, AggregationConfig::default());
    assert_eq!(cfg.order, AssignmentOrder::ChannelMajor);
    assert!(!cfg.traces(0));
}

#[test]
fn reads_every_key() {
    let cfg = AggregationConfig::from_lookup(lookup_from(&[
        ("AGG_ORDER", "File"),
        ("AGG_TRACE_DIR", "/tmp/agg"),
        ("AGG_TRACE_TIMESTEP", "3"),
    ]))
    .unwrap();
    assert_eq!(cfg.order, AssignmentOrder::FileMajor);
    assert_eq!(cfg.trace_dir, Some(PathBuf::from("/tmp/agg")));
    assert!(cfg.traces(3));
    assert!(!cfg.traces(0));
}

#[test]
fn empty_trace_dir_disables_tracing() {
    let cfg = AggregationConfig::from_lookup(lookup_from(&[("AGG_TRACE_DIR", "")])).unwrap();
    assert_eq!(cfg.trace_dir, None);
}

#[test]
fn rejects_unknown_order() {
    let err = AggregationConfig::from_lookup(lookup_from(&[("AGG_ORDER", "diagonal")])).unwrap_err();
    assert!(matches!(err, ConfigError::Invalid { key: "AGG_ORDER", .. }));
}

#[test]
fn rejects_bad_timestep() {
    let err =
        AggregationConfig::from_lookup(lookup_from(&[("AGG_TRACE_TIMESTEP", "-1")])).unwrap_err();
    assert!(matches!(
        err,
        ConfigError::Invalid {
            key: "AGG_TRACE_TIMESTEP",
            ..
        }
    ));
}

#[test]
fn builders_compose() {
    let cfg = AggregationConfig::default()
        .with_order(AssignmentOrder::FileMajor)
        .with_trace_dir("trace")
        .with_trace_timestep(2);
    assert!(cfg.traces(2));
    assert_eq!(cfg.order, AssignmentOrder::FileMajor);
}
