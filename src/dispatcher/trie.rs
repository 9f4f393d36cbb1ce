// Copyright (c) 2024 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Topic filter trie for non-shared subscriptions.
//!
//! One node per `/`-separated level; `+` descends through a dedicated
//! child, `#` subscribers attach to the node whose subtree they cover
//! (the parent level included [MQTT-4.7.1-1]). Filters starting with a
//! wildcard never match topics starting with `$` [MQTT-4.7.2-1].

use std::collections::HashMap;

use crate::types::SessionKey;

/// One subscription reference stored in the trie.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscriber {
    pub key: SessionKey,

    /// The filter as subscribed, to look the options up in the session
    /// state.
    pub filter: String,
}

#[derive(Debug, Default)]
struct TrieNode {
    children: HashMap<String, TrieNode>,

    /// The `+` child.
    single: Option<Box<TrieNode>>,

    /// Filters ending exactly at this node.
    subscribers: Vec<Subscriber>,

    /// Filters ending in `#` at this node.
    multi_subscribers: Vec<Subscriber>,
}

impl TrieNode {
    fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
            && self.multi_subscribers.is_empty()
            && self.children.is_empty()
            && self.single.is_none()
    }
}

/// The subscription index.
#[derive(Debug, Default)]
pub struct SubTrie {
    root: TrieNode,
}

impl SubTrie {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a validated filter. A session subscribing twice to the same
    /// filter keeps one trie entry.
    pub fn insert(&mut self, filter: &str, subscriber: Subscriber) {
        let mut node = &mut self.root;
        for level in filter.split('/') {
            match level {
                "#" => {
                    if !node.multi_subscribers.contains(&subscriber) {
                        node.multi_subscribers.push(subscriber);
                    }
                    return;
                }
                "+" => {
                    node = node.single.get_or_insert_with(Box::default);
                }
                _ => {
                    node = node.children.entry(level.to_string()).or_default();
                }
            }
        }
        if !node.subscribers.contains(&subscriber) {
            node.subscribers.push(subscriber);
        }
    }

    /// Remove one subscription; empty branches are pruned.
    pub fn remove(&mut self, filter: &str, key: &SessionKey) {
        let levels: Vec<&str> = filter.split('/').collect();
        let _empty = Self::remove_walk(&mut self.root, &levels, filter, key);
    }

    fn remove_walk(node: &mut TrieNode, levels: &[&str], filter: &str, key: &SessionKey) -> bool {
        match levels.first() {
            None => {
                node.subscribers
                    .retain(|s| !(s.key == *key && s.filter == filter));
            }
            Some(&"#") => {
                node.multi_subscribers
                    .retain(|s| !(s.key == *key && s.filter == filter));
            }
            Some(&"+") => {
                if let Some(single) = &mut node.single {
                    if Self::remove_walk(single, &levels[1..], filter, key) {
                        node.single = None;
                    }
                }
            }
            Some(level) => {
                if let Some(child) = node.children.get_mut(*level) {
                    if Self::remove_walk(child, &levels[1..], filter, key) {
                        node.children.remove(*level);
                    }
                }
            }
        }
        node.is_empty()
    }

    /// Every subscription matching `topic`.
    #[must_use]
    pub fn matches(&self, topic: &str) -> Vec<Subscriber> {
        let levels: Vec<&str> = topic.split('/').collect();
        let mut acc = Vec::new();
        // Wildcards at the first level do not match '$' topics.
        let skip_wildcards = topic.starts_with('$');
        Self::walk(&self.root, &levels, &mut acc, skip_wildcards);
        acc
    }

    fn walk(node: &TrieNode, levels: &[&str], acc: &mut Vec<Subscriber>, skip_wildcards: bool) {
        if !skip_wildcards {
            acc.extend(node.multi_subscribers.iter().cloned());
        }
        let Some((head, rest)) = levels.split_first() else {
            acc.extend(node.subscribers.iter().cloned());
            return;
        };
        if let Some(child) = node.children.get(*head) {
            Self::walk(child, rest, acc, false);
        }
        if !skip_wildcards {
            if let Some(single) = &node.single {
                Self::walk(single, rest, acc, false);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(name: &str) -> SessionKey {
        SessionKey::new(String::new(), name.to_string())
    }

    fn sub(name: &str, filter: &str) -> Subscriber {
        Subscriber {
            key: key(name),
            filter: filter.to_string(),
        }
    }

    #[test]
    fn test_exact_and_wildcard_match() {
        let mut trie = SubTrie::new();
        trie.insert("sport/tennis/player1", sub("a", "sport/tennis/player1"));
        trie.insert("sport/+/player1", sub("b", "sport/+/player1"));
        trie.insert("sport/#", sub("c", "sport/#"));
        trie.insert("#", sub("d", "#"));

        let matched = trie.matches("sport/tennis/player1");
        let names: Vec<&str> = matched.iter().map(|s| s.key.client_id.as_str()).collect();
        assert!(names.contains(&"a"));
        assert!(names.contains(&"b"));
        assert!(names.contains(&"c"));
        assert!(names.contains(&"d"));

        // '#' covers the parent level as well.
        let matched = trie.matches("sport");
        let names: Vec<&str> = matched.iter().map(|s| s.key.client_id.as_str()).collect();
        assert!(names.contains(&"c"));
        assert!(names.contains(&"d"));
        assert!(!names.contains(&"a"));
    }

    #[test]
    fn test_dollar_topics_hidden_from_top_level_wildcards() {
        let mut trie = SubTrie::new();
        trie.insert("#", sub("a", "#"));
        trie.insert("+/status", sub("b", "+/status"));
        trie.insert("$internal/status", sub("c", "$internal/status"));

        let matched = trie.matches("$internal/status");
        let names: Vec<&str> = matched.iter().map(|s| s.key.client_id.as_str()).collect();
        assert_eq!(names, vec!["c"]);
    }

    #[test]
    fn test_remove_prunes_branches() {
        let mut trie = SubTrie::new();
        trie.insert("a/b/c", sub("x", "a/b/c"));
        trie.remove("a/b/c", &key("x"));
        assert!(trie.matches("a/b/c").is_empty());
        assert!(trie.root.is_empty());
    }

    #[test]
    fn test_duplicate_insert_kept_once() {
        let mut trie = SubTrie::new();
        trie.insert("a/+", sub("x", "a/+"));
        trie.insert("a/+", sub("x", "a/+"));
        assert_eq!(trie.matches("a/1").len(), 1);
    }
}
