//! Topic matching
//!
//! Topics are `.`-separated segments. In a subscription pattern `*` stands for
//! exactly one segment and `#` for zero or more:
//!
//! - `platform.management.plugin.*.heartbeat` matches
//!   `platform.management.plugin.7f3a.heartbeat`
//! - `platform.management.#` matches every management topic
//! - anything else must be equal segment by segment

/// Does `topic` fall under the subscription `pattern`?
pub fn topic_matches(pattern: &str, topic: &str) -> bool {
    if pattern == topic {
        return true;
    }

    let pattern: Vec<&str> = pattern.split('.').collect();
    let topic: Vec<&str> = topic.split('.').collect();
    match_segments(&pattern, &topic)
}

fn match_segments(pattern: &[&str], topic: &[&str]) -> bool {
    match (pattern.split_first(), topic.split_first()) {
        (None, None) => true,
        (Some((&"#", rest)), _) => {
            match_segments(rest, topic)
                || (!topic.is_empty() && match_segments(pattern, &topic[1..]))
        }
        (Some((&"*", rest)), Some((_, topic_rest))) => match_segments(rest, topic_rest),
        (Some((segment, rest)), Some((topic_segment, topic_rest))) => {
            segment == topic_segment && match_segments(rest, topic_rest)
        }
        _ => false,
    }
}
