use std::sync::LazyLock;

use regex::Regex;

static MENTION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"@([^@\s,.;"'?!#]+)"#).expect("mention pattern is valid"));

pub fn mentions(text: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for capture in MENTION.captures_iter(text) {
        let name = capture[1].to_string();
        if !names.contains(&name) {
            names.push(name);
        }
    }
    names
}

pub fn mentioned_recipients(text: &str, sender: &str, connected: &[String]) -> Option<Vec<String>> {
    let recipients: Vec<String> = mentions(text)
        .into_iter()
        .filter(|name| name != sender && connected.contains(name))
        .collect();
    (!recipients.is_empty()).then_some(recipients)
}

pub fn format_chat(sender: &str, text: &str) -> String {
    format!("@{sender}:{text}")
}
