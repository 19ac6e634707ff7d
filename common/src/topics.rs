pub const EVENT_TOPIC_WILDCARD: &str = "+";
pub const PLUGIN_STATE_SUFFIX: &str = "state";

pub fn event_subscription(prefix: &str) -> String {
    format!("{prefix}{EVENT_TOPIC_WILDCARD}")
}

pub fn event_name_from_topic<'a>(prefix: &str, topic: &'a str) -> Option<&'a str> {
    let name = topic.strip_prefix(prefix)?;
    if name.is_empty() || name.contains('/') {
        return None;
    }
    Some(name)
}

pub fn plugin_state_topic(plugin_topic: &str) -> String {
    format!("{plugin_topic}/{PLUGIN_STATE_SUFFIX}")
}
