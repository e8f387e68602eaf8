use crate::config::MissingAudioPolicy;
use crate::session::SessionError;
use crate::source::{ExtractionResult, MediaStream};

#[derive(Debug, Clone, PartialEq)]
pub enum AudioPlan {
    Stream(MediaStream),
    /// No audio track exists; the transcoder synthesizes silence.
    Silence,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    pub video: MediaStream,
    pub audio: AudioPlan,
}

impl Selection {
    /// True when the chosen audio comes from the chosen video stream itself.
    pub fn shares_input(&self) -> bool {
        match &self.audio {
            AudioPlan::Stream(audio) => {
                audio.format_id == self.video.format_id && audio.url == self.video.url
            }
            AudioPlan::Silence => false,
        }
    }

    /// yt-dlp style format selector for local materialization.
    pub fn format_selector(&self) -> String {
        match &self.audio {
            AudioPlan::Stream(audio) if !self.shares_input() => {
                format!("{}+{}", self.video.format_id, audio.format_id)
            }
            _ => self.video.format_id.clone(),
        }
    }
}

/// First video stream in extraction order at exactly `resolution` in an MP4
/// container. Order matters: an earlier, lower-bitrate entry wins over a
/// later one at the same height.
pub fn select_video(result: &ExtractionResult, resolution: u32) -> Option<&MediaStream> {
    result
        .streams
        .iter()
        .find(|stream| {
            stream.has_video() && stream.height == Some(resolution) && stream.is_mp4_family()
        })
}

/// Audio-capable stream with the highest average bitrate; the first one
/// wins a tie. Missing bitrates count as zero.
pub fn select_audio(result: &ExtractionResult) -> Option<&MediaStream> {
    let mut best: Option<&MediaStream> = None;
    for stream in result.streams.iter().filter(|stream| stream.has_audio()) {
        let bitrate = stream.audio_bitrate.unwrap_or(0.0);
        match best {
            Some(current) if current.audio_bitrate.unwrap_or(0.0) >= bitrate => {}
            _ => best = Some(stream),
        }
    }
    best
}

pub fn select_streams(
    result: &ExtractionResult,
    resolution: u32,
    missing_audio: MissingAudioPolicy,
) -> Result<Selection, SessionError> {
    let video = select_video(result, resolution)
        .cloned()
        .ok_or(SessionError::NoMatchingFormat { resolution })?;

    let audio = match (select_audio(result), missing_audio) {
        (Some(stream), _) => AudioPlan::Stream(stream.clone()),
        (None, MissingAudioPolicy::Silence) => AudioPlan::Silence,
        (None, MissingAudioPolicy::Fail) => return Err(SessionError::NoAudioStream),
    };

    Ok(Selection { video, audio })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{RequestHeaders, StreamKind};

    fn video(id: &str, ext: &str, height: u32) -> MediaStream {
        MediaStream {
            format_id: id.into(),
            kind: StreamKind::VideoOnly,
            container: ext.into(),
            video_codec: Some("avc1".into()),
            audio_codec: None,
            height: Some(height),
            audio_bitrate: None,
            url: format!("https://cdn.test/{id}"),
            headers: RequestHeaders::new(),
        }
    }

    fn audio(id: &str, abr: Option<f64>) -> MediaStream {
        MediaStream {
            format_id: id.into(),
            kind: StreamKind::AudioOnly,
            container: "m4a".into(),
            video_codec: None,
            audio_codec: Some("mp4a.40.2".into()),
            height: None,
            audio_bitrate: abr,
            url: format!("https://cdn.test/{id}"),
            headers: RequestHeaders::new(),
        }
    }

    fn extraction(streams: Vec<MediaStream>) -> ExtractionResult {
        ExtractionResult {
            streams,
            ..ExtractionResult::default()
        }
    }

    #[test]
    fn picks_highest_bitrate_audio() {
        let result = extraction(vec![
            audio("a64", Some(64.0)),
            audio("a128", Some(128.0)),
            audio("a96", Some(96.0)),
        ]);
        assert_eq!(select_audio(&result).unwrap().format_id, "a128");
    }

    #[test]
    fn first_audio_wins_a_bitrate_tie() {
        let result = extraction(vec![
            audio("first", Some(128.0)),
            audio("second", Some(128.0)),
            audio("missing", None),
        ]);
        assert_eq!(select_audio(&result).unwrap().format_id, "first");
    }

    #[test]
    fn video_selection_is_first_exact_mp4_match() {
        let result = extraction(vec![
            video("webm1080", "webm", 1080),
            video("mp4720", "mp4", 720),
            video("mp4-1080-a", "mp4", 1080),
            video("mp4-1080-b", "mp4", 1080),
        ]);
        assert_eq!(
            select_video(&result, 1080).unwrap().format_id,
            "mp4-1080-a"
        );
        assert!(select_video(&result, 1440).is_none());
    }

    #[test]
    fn height_miss_is_no_matching_format() {
        let result = extraction(vec![video("v", "mp4", 720), audio("a", Some(128.0))]);
        let err = select_streams(&result, 1080, MissingAudioPolicy::Fail).unwrap_err();
        assert!(matches!(err, SessionError::NoMatchingFormat { resolution: 1080 }));
    }

    #[test]
    fn missing_audio_follows_policy() {
        let result = extraction(vec![video("v", "mp4", 1080)]);
        assert!(matches!(
            select_streams(&result, 1080, MissingAudioPolicy::Fail),
            Err(SessionError::NoAudioStream)
        ));
        let selection = select_streams(&result, 1080, MissingAudioPolicy::Silence).unwrap();
        assert_eq!(selection.audio, AudioPlan::Silence);
        assert_eq!(selection.format_selector(), "v");
    }

    #[test]
    fn muxed_stream_can_supply_both_tracks() {
        let mut muxed = video("18", "mp4", 360);
        muxed.kind = StreamKind::Muxed;
        muxed.audio_codec = Some("mp4a.40.2".into());
        muxed.audio_bitrate = Some(96.0);
        let result = extraction(vec![muxed]);

        let selection = select_streams(&result, 360, MissingAudioPolicy::Fail).unwrap();
        assert!(selection.shares_input());
        assert_eq!(selection.format_selector(), "18");
    }

    #[test]
    fn separate_tracks_produce_combined_selector() {
        let result = extraction(vec![video("137", "mp4", 1080), audio("140", Some(129.0))]);
        let selection = select_streams(&result, 1080, MissingAudioPolicy::Fail).unwrap();
        assert!(!selection.shares_input());
        assert_eq!(selection.format_selector(), "137+140");
    }
}
