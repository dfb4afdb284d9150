//! Response relay: deliver reply text to the originating chat.
//!
//! Telegram caps a message at 4096 UTF-16 code units, so long replies are split,
//! preferring paragraph, then line, then word boundaries. Delivery failures are
//! logged and swallowed; nothing is retried.

use crate::channels::ChannelHandle;

/// Telegram's per-message cap, in UTF-16 code units.
pub const MESSAGE_LIMIT: usize = 4096;

/// Send `text` to `chat_id`. Returns true when every chunk was delivered.
pub async fn relay(channel: &dyn ChannelHandle, chat_id: i64, text: &str) -> bool {
    for chunk in chunk_text(text, MESSAGE_LIMIT) {
        if let Err(e) = channel.send_message(chat_id, &chunk).await {
            log::warn!(
                "relay: failed to send message to {} chat {}: {}",
                channel.id(),
                chat_id,
                e
            );
            return false;
        }
    }
    true
}

/// Split `text` into non-empty chunks of at most `limit` UTF-16 code units.
pub fn chunk_text(text: &str, limit: usize) -> Vec<String> {
    let limit = limit.max(2);
    let mut chunks = Vec::new();
    let mut rest = text;
    while !rest.is_empty() {
        if rest.encode_utf16().count() <= limit {
            chunks.push(rest.to_string());
            break;
        }
        let window_end = utf16_window_end(rest, limit);
        let window = &rest[..window_end];
        let cut = window
            .rfind("\n\n")
            .or_else(|| window.rfind('\n'))
            .or_else(|| window.rfind(' '))
            .filter(|&i| i > 0)
            .unwrap_or(window_end);
        let (head, tail) = rest.split_at(cut);
        if !head.trim().is_empty() {
            chunks.push(head.trim_end().to_string());
        }
        rest = tail.trim_start_matches(['\n', ' ']);
    }
    chunks
}

/// Byte index where the longest prefix of `text` fitting in `limit` UTF-16 units ends.
fn utf16_window_end(text: &str, limit: usize) -> usize {
    let mut units = 0;
    for (i, c) in text.char_indices() {
        units += c.len_utf16();
        if units > limit {
            return i;
        }
    }
    text.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct Recorder {
        sent: Mutex<Vec<(i64, String)>>,
        fail: bool,
    }

    #[async_trait]
    impl ChannelHandle for Recorder {
        fn id(&self) -> &str {
            "test"
        }

        fn stop(&self) {}

        async fn send_message(&self, chat_id: i64, text: &str) -> Result<(), String> {
            if self.fail {
                return Err("403 Forbidden".to_string());
            }
            self.sent.lock().unwrap().push((chat_id, text.to_string()));
            Ok(())
        }
    }

    #[test]
    fn short_text_is_one_chunk() {
        assert_eq!(chunk_text("Hi there", MESSAGE_LIMIT), vec!["Hi there"]);
        assert!(chunk_text("", MESSAGE_LIMIT).is_empty());
    }

    #[test]
    fn splits_on_paragraph_boundary() {
        let text = "aaaa bbbb\n\ncccc dddd";
        assert_eq!(chunk_text(text, 12), vec!["aaaa bbbb", "cccc dddd"]);
    }

    #[test]
    fn hard_splits_without_boundaries() {
        let chunks = chunk_text("abcdefghij", 4);
        assert_eq!(chunks, vec!["abcd", "efgh", "ij"]);
    }

    #[test]
    fn respects_multibyte_characters() {
        let text = "é".repeat(10);
        let chunks = chunk_text(&text, 3);
        assert!(chunks.iter().all(|c| c.chars().count() <= 3));
        assert_eq!(chunks.concat(), text);
    }

    #[test]
    fn astral_characters_count_as_two_units() {
        let text = "😀".repeat(3000);
        let chunks = chunk_text(&text, MESSAGE_LIMIT);
        assert_eq!(chunks.len(), 2);
        assert!(chunks.iter().all(|c| c.encode_utf16().count() <= MESSAGE_LIMIT));
        assert_eq!(chunks[0].chars().count(), 2048);
        assert_eq!(chunks.concat(), text);
    }

    #[tokio::test]
    async fn relay_sends_every_chunk_in_order() {
        let rec = Recorder {
            sent: Mutex::new(Vec::new()),
            fail: false,
        };
        let long = format!("{}\n\n{}", "a".repeat(4000), "b".repeat(200));
        assert!(relay(&rec, 42, &long).await);
        let sent = rec.sent.lock().unwrap();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0], (42, "a".repeat(4000)));
        assert_eq!(sent[1], (42, "b".repeat(200)));
    }

    #[tokio::test]
    async fn relay_swallows_delivery_failure() {
        let rec = Recorder {
            sent: Mutex::new(Vec::new()),
            fail: true,
        };
        assert!(!relay(&rec, 42, "Hi there").await);
    }
}
