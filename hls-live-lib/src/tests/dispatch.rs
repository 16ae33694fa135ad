//! Request dispatch, playlist annotation and byte accounting

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use axum::http::{header, StatusCode};
    use bytes::Bytes;

    use crate::error::HlsError;
    use crate::playlist::{PlaylistAnnotator, PLAYLIST_CONTENT_TYPE};
    use crate::stream::Codec;
    use crate::tests::fixtures::*;

    fn subtitle_lines(text: &str) -> usize {
        text.lines()
            .filter(|line| line.starts_with("#EXT-X-MEDIA:TYPE=SUBTITLES"))
            .count()
    }

    #[tokio::test]
    async fn test_multivariant_is_annotated() {
        let s = annotated_session();

        let response = s.muxer.handle_request(get("/cam/index.m3u8")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            PLAYLIST_CONTENT_TYPE
        );

        let body = body_bytes(response).await;
        let text = std::str::from_utf8(&body).unwrap();
        let tag = PlaylistAnnotator::new(&german()).tag().to_string();
        let expected = MULTIVARIANT.replacen(
            "#EXT-X-INDEPENDENT-SEGMENTS\n",
            &format!("#EXT-X-INDEPENDENT-SEGMENTS\n{}\n", tag),
            1,
        );
        assert_eq!(text, expected);
        assert_eq!(s.bytes_sent.load(Ordering::SeqCst), body.len() as u64);
    }

    #[tokio::test]
    async fn test_every_request_is_annotated_once() {
        let s = annotated_session();

        for _ in 0..3 {
            let response = s.muxer.handle_request(get("/cam/index.m3u8")).await.unwrap();
            let body = body_bytes(response).await;
            assert_eq!(subtitle_lines(std::str::from_utf8(&body).unwrap()), 1);
        }
    }

    #[tokio::test]
    async fn test_engine_regenerated_playlist_is_reannotated() {
        let s = annotated_session();
        let _ = body_bytes(s.muxer.handle_request(get("/cam/index.m3u8")).await.unwrap()).await;

        *s.engine.multivariant.lock() = Bytes::from(MULTIVARIANT.replace("1200000", "900000"));

        let body = body_bytes(s.muxer.handle_request(get("/cam/index.m3u8")).await.unwrap()).await;
        let text = std::str::from_utf8(&body).unwrap();
        assert!(text.contains("BANDWIDTH=900000"));
        assert_eq!(subtitle_lines(text), 1);
    }

    #[tokio::test]
    async fn test_foreign_subtitles_are_left_alone() {
        let s = annotated_session();
        let foreign = MULTIVARIANT.replace(
            "#EXT-X-INDEPENDENT-SEGMENTS\n",
            "#EXT-X-INDEPENDENT-SEGMENTS\n#EXT-X-MEDIA:TYPE=SUBTITLES,GROUP-ID=\"cc\",NAME=\"English\",URI=\"en.m3u8\"\n",
        );
        *s.engine.multivariant.lock() = Bytes::from(foreign.clone());

        let body = body_bytes(s.muxer.handle_request(get("/cam/index.m3u8")).await.unwrap()).await;
        assert_eq!(&body[..], foreign.as_bytes());
    }

    #[tokio::test]
    async fn test_missing_anchor_is_served_unchanged() {
        let s = annotated_session();
        let plain = "#EXTM3U\n#EXT-X-STREAM-INF:BANDWIDTH=1\nstream.m3u8\n";
        *s.engine.multivariant.lock() = Bytes::from_static(plain.as_bytes());

        let response = s.muxer.handle_request(get("/cam/index.m3u8")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(&body_bytes(response).await[..], plain.as_bytes());
    }

    #[tokio::test]
    async fn test_segment_passes_through() {
        let s = annotated_session();

        let response = s.muxer.handle_request(get("/cam/segment_5.ts")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "video/mp2t");

        let body = body_bytes(response).await;
        assert_eq!(&body[..], SEGMENT);
        assert_eq!(s.bytes_sent.load(Ordering::SeqCst), SEGMENT.len() as u64);
    }

    #[tokio::test]
    async fn test_engine_errors_pass_through() {
        let s = annotated_session();

        let response = s.muxer.handle_request(get("/cam/segment_99.ts")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_without_subtitles_playlist_is_untouched() {
        let s = session(
            muxer_config(None, None),
            vec![Codec::H264],
            ScriptedEngine::new(),
            false,
        );
        s.muxer.initialize().unwrap();

        let body = body_bytes(s.muxer.handle_request(get("/cam/index.m3u8")).await.unwrap()).await;
        assert_eq!(&body[..], MULTIVARIANT.as_bytes());
    }

    #[tokio::test]
    async fn test_requests_need_an_active_session() {
        let s = session(
            muxer_config(None, Some(german())),
            vec![Codec::H264],
            ScriptedEngine::new(),
            false,
        );
        assert!(matches!(
            s.muxer.handle_request(get("/cam/index.m3u8")).await,
            Err(HlsError::NotActive)
        ));

        s.muxer.initialize().unwrap();
        s.muxer.close();
        assert!(matches!(
            s.muxer.handle_request(get("/cam/segment_5.ts")).await,
            Err(HlsError::NotActive)
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_requests_are_all_counted() {
        let s = annotated_session();
        let mut handles = Vec::new();

        for i in 0..32 {
            let muxer = s.muxer.clone();
            let path = if i % 2 == 0 {
                "/cam/index.m3u8"
            } else {
                "/cam/segment_5.ts"
            };
            handles.push(tokio::spawn(async move {
                let response = muxer.handle_request(get(path)).await.unwrap();
                body_bytes(response).await.len() as u64
            }));
        }

        let mut total = 0;
        for handle in handles {
            total += handle.await.unwrap();
        }

        assert_eq!(s.muxer.bytes_sent(), total);
    }

    #[tokio::test]
    async fn test_oversized_playlist_is_served_unchanged() {
        let s = annotated_session();
        let mut huge = MULTIVARIANT.as_bytes().to_vec();
        huge.resize(4 * 1024 * 1024 + 1, b'\n');
        *s.engine.multivariant.lock() = Bytes::from(huge.clone());

        let response = s.muxer.handle_request(get("/cam/index.m3u8")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_bytes(response).await;
        assert_eq!(&body[..], &huge[..]);
        assert_eq!(subtitle_lines(std::str::from_utf8(&body).unwrap()), 0);
        assert_eq!(s.bytes_sent.load(Ordering::SeqCst), huge.len() as u64);
    }
}
