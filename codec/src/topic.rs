// Copyright (c) 2023 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Topic names, topic filters and the wildcard matching rules of
//! `MQTT chapter-4.7 Topic Names and Topic Filters`.

use byteorder::{BigEndian, WriteBytesExt};
use std::fmt;
use std::io::Write;
use std::str::FromStr;

use crate::{ByteArray, DecodeError, DecodePacket, EncodeError, EncodePacket};

/// Prefix that routes a filter into the shared subscription table.
pub const SHARE_PREFIX: &str = "$share/";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopicError {
    EmptyTopic,
    TooManyData,
    InvalidChar,
    ContainsWildChar,
    InvalidFilter,
}

/// Validate a topic name used in PUBLISH packets.
///
/// Wildcard characters are forbidden [MQTT-3.3.2-2]. An empty name is
/// accepted here because a v5 PUBLISH may carry an empty name plus a topic
/// alias; callers reject empty names where no alias applies.
///
/// # Errors
///
/// Returns error if `topic` is invalid.
pub fn validate_pub_topic(topic: &str) -> Result<(), TopicError> {
    if topic.len() > u16::MAX as usize {
        return Err(TopicError::TooManyData);
    }
    if topic.bytes().any(|b| b == b'+' || b == b'#') {
        return Err(TopicError::ContainsWildChar);
    }
    Ok(())
}

/// Validate a topic filter used in SUBSCRIBE/UNSUBSCRIBE packets.
///
/// `+` must occupy a whole level; `#` must occupy the last level
/// [MQTT-4.7.1-2], [MQTT-4.7.1-3].
///
/// # Errors
///
/// Returns error if `filter` is invalid.
pub fn validate_sub_topic(filter: &str) -> Result<(), TopicError> {
    if filter.is_empty() {
        return Err(TopicError::EmptyTopic);
    }
    if filter.len() > u16::MAX as usize {
        return Err(TopicError::TooManyData);
    }
    let bytes = filter.as_bytes();
    for (index, b) in bytes.iter().enumerate() {
        match b {
            b'#' => {
                if index > 0 && bytes[index - 1] != b'/' {
                    return Err(TopicError::InvalidChar);
                }
                if index != bytes.len() - 1 {
                    return Err(TopicError::InvalidChar);
                }
            }
            b'+' => {
                if index > 0 && bytes[index - 1] != b'/' {
                    return Err(TopicError::InvalidChar);
                }
                if index != bytes.len() - 1 && bytes[index + 1] != b'/' {
                    return Err(TopicError::InvalidChar);
                }
            }
            _ => (),
        }
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
enum FilterLevel {
    /// Literal level, possibly empty.
    Normal(String),

    /// `+`, matches exactly one level.
    SingleWildcard,

    /// `#`, matches the remaining levels including the parent.
    MultiWildcard,
}

impl FilterLevel {
    fn parse(s: &str) -> Self {
        match s {
            "+" => Self::SingleWildcard,
            "#" => Self::MultiWildcard,
            _ => Self::Normal(s.to_string()),
        }
    }
}

/// A parsed topic filter, with the optional `$share/<group>/` prefix split
/// off, ready for repeated matching.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TopicFilter {
    filter: String,
    share: Option<String>,
    levels: Vec<FilterLevel>,
}

impl TopicFilter {
    /// Parse and validate a filter string.
    ///
    /// # Errors
    ///
    /// Returns error if `s` violates the wildcard or shared subscription
    /// rules.
    pub fn parse(s: &str) -> Result<Self, TopicError> {
        let (share, rest) = if let Some(stripped) = s.strip_prefix(SHARE_PREFIX) {
            // ShareName MUST NOT contain wildcards or '/' and MUST be
            // followed by a non-empty filter [MQTT-4.8.2-1], [MQTT-4.8.2-2].
            let Some((group, filter)) = stripped.split_once('/') else {
                return Err(TopicError::InvalidFilter);
            };
            if group.is_empty() || group.bytes().any(|b| b == b'+' || b == b'#') {
                return Err(TopicError::InvalidFilter);
            }
            (Some(group.to_string()), filter)
        } else {
            (None, s)
        };

        validate_sub_topic(rest)?;
        let levels = rest.split('/').map(FilterLevel::parse).collect();
        Ok(Self {
            filter: rest.to_string(),
            share,
            levels,
        })
    }

    /// The full filter string as subscribed, including any share prefix.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.filter
    }

    /// Share group name, if this is a shared subscription filter.
    #[must_use]
    pub fn share(&self) -> Option<&str> {
        self.share.as_deref()
    }

    #[must_use]
    pub const fn is_shared(&self) -> bool {
        self.share.is_some()
    }

    /// Match a topic name against this filter.
    #[must_use]
    pub fn is_match(&self, topic: &str) -> bool {
        // Topics beginning with '$' are not matched by filters starting
        // with a wildcard [MQTT-4.7.2-1].
        if topic.starts_with('$')
            && matches!(
                self.levels.first(),
                Some(FilterLevel::SingleWildcard | FilterLevel::MultiWildcard)
            )
        {
            return false;
        }

        let mut parts = topic.split('/');
        for level in &self.levels {
            match level {
                FilterLevel::MultiWildcard => return true,
                FilterLevel::SingleWildcard => {
                    if parts.next().is_none() {
                        return false;
                    }
                }
                FilterLevel::Normal(expected) => match parts.next() {
                    Some(part) if part == expected => (),
                    _ => return false,
                },
            }
        }
        parts.next().is_none()
    }
}

impl FromStr for TopicFilter {
    type Err = TopicError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for TopicFilter {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.share {
            Some(group) => write!(f, "{SHARE_PREFIX}{group}/{}", self.filter),
            None => write!(f, "{}", self.filter),
        }
    }
}

/// Wire form of a topic name in PUBLISH packets.
#[derive(Debug, Default, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PubTopic(String);

impl PubTopic {
    /// Wrap a non-empty topic name.
    ///
    /// # Errors
    ///
    /// Returns error if `topic` is empty or contains wildcards.
    pub fn new(topic: &str) -> Result<Self, TopicError> {
        if topic.is_empty() {
            return Err(TopicError::EmptyTopic);
        }
        validate_pub_topic(topic)?;
        Ok(Self(topic.to_string()))
    }

    /// An empty topic name, legal only together with a topic alias.
    #[must_use]
    pub const fn empty() -> Self {
        Self(String::new())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Byte length in packet.
    #[must_use]
    pub fn bytes(&self) -> usize {
        2 + self.0.len()
    }
}

impl AsRef<str> for PubTopic {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl DecodePacket for PubTopic {
    fn decode(ba: &mut ByteArray) -> Result<Self, DecodeError> {
        let len = ba.read_u16()?;
        let s = ba.read_string(len as usize)?;
        validate_pub_topic(&s)?;
        Ok(Self(s))
    }
}

impl EncodePacket for PubTopic {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
        #[allow(clippy::cast_possible_truncation)]
        let len = self.0.len() as u16;
        buf.write_u16::<BigEndian>(len)?;
        buf.write_all(self.0.as_bytes())?;
        Ok(self.bytes())
    }
}

/// Wire form of a topic filter in SUBSCRIBE/UNSUBSCRIBE packets.
#[derive(Debug, Default, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubTopic(String);

impl SubTopic {
    /// Wrap a filter string after validation, shared prefix included.
    ///
    /// # Errors
    ///
    /// Returns error if `filter` is invalid.
    pub fn new(filter: &str) -> Result<Self, TopicError> {
        let _parsed = TopicFilter::parse(filter)?;
        Ok(Self(filter.to_string()))
    }

    /// Byte length in packet.
    #[must_use]
    pub fn bytes(&self) -> usize {
        2 + self.0.len()
    }
}

impl AsRef<str> for SubTopic {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl DecodePacket for SubTopic {
    fn decode(ba: &mut ByteArray) -> Result<Self, DecodeError> {
        let len = ba.read_u16()?;
        let s = ba.read_string(len as usize)?;
        let _parsed = TopicFilter::parse(&s)?;
        Ok(Self(s))
    }
}

impl EncodePacket for SubTopic {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
        #[allow(clippy::cast_possible_truncation)]
        let len = self.0.len() as u16;
        buf.write_u16::<BigEndian>(len)?;
        buf.write_all(self.0.as_bytes())?;
        Ok(self.bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_sub_topic() {
        assert!(validate_sub_topic("sport/tennis/player/#").is_ok());
        assert!(validate_sub_topic("sport/tennis/player#").is_err());
        assert!(validate_sub_topic("#").is_ok());
        assert!(validate_sub_topic("sport/#/player").is_err());
        assert!(validate_sub_topic("+").is_ok());
        assert!(validate_sub_topic("sport+").is_err());
        assert!(validate_sub_topic("+/tennis/+").is_ok());
        assert!(validate_sub_topic("").is_err());
    }

    #[test]
    fn test_validate_pub_topic() {
        assert!(validate_pub_topic("sport/tennis").is_ok());
        assert!(validate_pub_topic("sport/#").is_err());
        assert!(validate_pub_topic("sport/+").is_err());
    }

    #[test]
    fn test_filter_match() {
        let filter = TopicFilter::parse("sport/tennis/#").unwrap();
        assert!(filter.is_match("sport/tennis"));
        assert!(filter.is_match("sport/tennis/player1"));
        assert!(filter.is_match("sport/tennis/player1/ranking"));
        assert!(!filter.is_match("sport/soccer"));

        let filter = TopicFilter::parse("sport/+/player1").unwrap();
        assert!(filter.is_match("sport/tennis/player1"));
        assert!(!filter.is_match("sport/player1"));

        let filter = TopicFilter::parse("+/+").unwrap();
        assert!(filter.is_match("/finance"));
        assert!(!filter.is_match("finance"));
    }

    #[test]
    fn test_filter_does_not_match_dollar_topics() {
        let filter = TopicFilter::parse("#").unwrap();
        assert!(!filter.is_match("$sys/uptime"));
        let filter = TopicFilter::parse("+/uptime").unwrap();
        assert!(!filter.is_match("$sys/uptime"));
        let filter = TopicFilter::parse("$sys/uptime").unwrap();
        assert!(filter.is_match("$sys/uptime"));
    }

    #[test]
    fn test_shared_filter() {
        let filter = TopicFilter::parse("$share/g1/topic1").unwrap();
        assert_eq!(filter.share(), Some("g1"));
        assert_eq!(filter.as_str(), "topic1");
        assert!(filter.is_match("topic1"));

        assert!(TopicFilter::parse("$share/g1").is_err());
        assert!(TopicFilter::parse("$share//topic1").is_err());
        assert!(TopicFilter::parse("$share/g+/topic1").is_err());
    }
}
