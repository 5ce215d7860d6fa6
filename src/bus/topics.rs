/// Subject layout for everything this service publishes or consumes.
///
/// Per-session subjects end with the session id; lifecycle subjects are
/// fixed literals under the namespace. Consumers subscribe with trailing
/// wildcards and filter by the session id carried in the payload.
#[derive(Debug, Clone)]
pub struct Topics {
    namespace: String,
}

impl Topics {
    pub fn new(namespace: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
        }
    }

    pub fn session_started(&self) -> String {
        format!("{}.session.started", self.namespace)
    }

    pub fn session_ended(&self) -> String {
        format!("{}.session.ended", self.namespace)
    }

    pub fn audio_frame(&self, session_id: &str) -> String {
        format!("{}.audio.frame.{}", self.namespace, session_id)
    }

    pub fn audio_frames_all(&self) -> String {
        format!("{}.audio.frame.>", self.namespace)
    }

    pub fn transcript(&self, session_id: &str, is_final: bool) -> String {
        let kind = if is_final { "final" } else { "partial" };
        format!("{}.stt.text.{}.{}", self.namespace, kind, session_id)
    }

    pub fn transcripts_all(&self) -> String {
        format!("{}.stt.text.>", self.namespace)
    }

    pub fn utterance_created(&self, session_id: &str) -> String {
        format!("{}.utterance.created.{}", self.namespace, session_id)
    }

    pub fn utterances_all(&self) -> String {
        format!("{}.utterance.created.>", self.namespace)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn per_session_subjects_end_with_session_id() {
        let topics = Topics::new("meet");
        assert_eq!(topics.audio_frame("sess-1"), "meet.audio.frame.sess-1");
        assert_eq!(topics.transcript("sess-1", false), "meet.stt.text.partial.sess-1");
        assert_eq!(topics.transcript("sess-1", true), "meet.stt.text.final.sess-1");
        assert_eq!(topics.utterance_created("sess-1"), "meet.utterance.created.sess-1");
    }

    #[test]
    fn wildcards_cover_the_family() {
        let topics = Topics::new("meet");
        assert_eq!(topics.audio_frames_all(), "meet.audio.frame.>");
        assert_eq!(topics.transcripts_all(), "meet.stt.text.>");
        assert_eq!(topics.utterances_all(), "meet.utterance.created.>");
    }
}
