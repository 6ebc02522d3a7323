use base64::Engine;

use crate::channels::ChannelTable;
use crate::protocol::{ChannelId, Endpoints};

/// Extended M3U for the given favorites, or `None` when there are none.
pub fn favorites_m3u(
    endpoints: &Endpoints,
    favorites: &[ChannelId],
    table: &ChannelTable,
) -> Option<String> {
    if favorites.is_empty() {
        return None;
    }
    let mut lines = vec!["#EXTM3U".to_string()];
    for ch in favorites {
        lines.push(format!("#EXTINF:-1,{}", table.name_of(ch)));
        lines.push(endpoints.stream(ch));
    }
    Some(lines.join("\n"))
}

/// Inline download link for a playlist body.
pub fn m3u_data_uri(content: &str) -> String {
    format!(
        "data:audio/x-mpegurl;base64,{}",
        base64::engine::general_purpose::STANDARD.encode(content.as_bytes())
    )
}

/// Per-channel XSPF download: `(href, suggested file name)`.
pub fn xspf_download(endpoints: &Endpoints, channel: &str) -> (String, String) {
    (endpoints.xspf(channel), format!("channel_{}.xspf", channel))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::ChannelRow;

    fn table() -> ChannelTable {
        ChannelTable::new(vec![ChannelRow {
            id: "5".into(),
            name: "60s on 6".into(),
            ..Default::default()
        }])
    }

    #[test]
    fn test_empty_favorites_have_no_playlist() {
        let e = Endpoints::new("http://h");
        assert_eq!(favorites_m3u(&e, &[], &table()), None);
    }

    #[test]
    fn test_playlist_lines() {
        let e = Endpoints::new("http://h");
        let body = favorites_m3u(&e, &["5".into(), "9".into()], &table()).unwrap();
        let lines: Vec<&str> = body.lines().collect();
        assert_eq!(
            lines,
            vec![
                "#EXTM3U",
                "#EXTINF:-1,60s on 6",
                "http://h/hls/5.m3u8",
                "#EXTINF:-1,Channel 9",
                "http://h/hls/9.m3u8",
            ]
        );
    }

    #[test]
    fn test_data_uri() {
        assert_eq!(m3u_data_uri("#EXTM3U"), "data:audio/x-mpegurl;base64,I0VYVE0zVQ==");
    }

    #[test]
    fn test_xspf_download() {
        let e = Endpoints::new("http://h");
        assert_eq!(
            xspf_download(&e, "7"),
            ("http://h/vlc/7.xspf".to_string(), "channel_7.xspf".to_string())
        );
    }
}
