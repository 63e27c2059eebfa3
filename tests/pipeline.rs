//! End-to-end tests of the track pipeline against a mock media server.
//!
//! The encoder is replaced by `cp`, so the final file of an assembled
//! playlist holds exactly the decrypted intermediate bytes.
#![cfg(unix)]

use std::{fs, path::Path, path::PathBuf, time::Duration};

use aes::Aes128;
use cfb_mode::{cipher::KeyIvInit, BufEncryptor};
use tokio::sync::mpsc;
use wiremock::{
    matchers::{method, path},
    Mock, MockServer, ResponseTemplate,
};

use vkaudio::{
    catalog::TrackDescriptor,
    config::{Config, EncoderConfig},
    events::Event,
    key::ZERO_IV,
    pipeline::{Pipeline, Route, Summary},
};

const KEY: &[u8; 16] = b"0123456789abcdef";

fn encrypt(plaintext: &[u8]) -> Vec<u8> {
    let mut buffer = plaintext.to_vec();
    BufEncryptor::<Aes128>::new_from_slices(KEY, &ZERO_IV)
        .unwrap()
        .encrypt(&mut buffer);
    buffer
}

async fn serve(server: &MockServer, at: &str, body: impl Into<Vec<u8>>) {
    Mock::given(method("GET"))
        .and(path(at))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body.into()))
        .mount(server)
        .await;
}

fn track(artist: &str, title: &str, url: String) -> TrackDescriptor {
    TrackDescriptor {
        artist: artist.to_owned(),
        title: title.to_owned(),
        url,
    }
}

fn config(output_dir: &Path, program: &str) -> Config {
    Config {
        output_dir: output_dir.to_path_buf(),
        encoder: EncoderConfig {
            program: PathBuf::from(program),
            args: vec![
                EncoderConfig::INPUT_PLACEHOLDER.to_owned(),
                EncoderConfig::OUTPUT_PLACEHOLDER.to_owned(),
            ],
        },
        ..Config::new()
    }
}

fn files_in(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

/// Serves an encrypted playlist of three segments over two key blocks under
/// one key, plus a clear block. Returns the expected assembled bytes.
async fn serve_playlist(server: &MockServer, dir: &str) -> Vec<u8> {
    let encrypted: Vec<u8> = (0..150u8).collect();
    let clear: Vec<u8> = (0..40u8).rev().collect();

    let ciphertext = encrypt(&encrypted);
    serve(server, &format!("/{dir}/seg-1.ts"), &ciphertext[..50]).await;
    serve(server, &format!("/{dir}/seg-2.ts"), &ciphertext[50..100]).await;
    serve(server, &format!("/{dir}/seg-3.ts"), &ciphertext[100..]).await;
    serve(server, &format!("/{dir}/seg-4.ts"), clear.clone()).await;

    let playlist = format!(
        "#EXTM3U\n\
         #EXT-X-TARGETDURATION:10\n\
         #EXT-X-MEDIA-SEQUENCE:1\n\
         #EXT-X-KEY:METHOD=AES-128,URI=\"{uri}/keys/key.pub\"\n\
         #EXTINF:10.000,\n\
         seg-1.ts?extra=a\n\
         #EXTINF:10.000,\n\
         seg-2.ts?extra=b\n\
         #EXT-X-KEY:METHOD=AES-128,URI=\"{uri}/keys/key.pub\"\n\
         #EXTINF:10.000,\n\
         seg-3.ts\n\
         #EXT-X-KEY:METHOD=NONE\n\
         #EXTINF:10.000,\n\
         seg-4.ts\n\
         #EXT-X-ENDLIST\n",
        uri = server.uri()
    );
    serve(server, &format!("/{dir}/index.m3u8"), playlist).await;

    [encrypted, clear].concat()
}

#[tokio::test]
async fn tracks_are_downloaded_assembled_and_skipped() {
    let server = MockServer::start().await;
    let output = tempfile::tempdir().unwrap();

    serve(&server, "/keys/key.pub", KEY.to_vec()).await;
    let assembled = serve_playlist(&server, "one").await;
    serve(&server, "/direct/track.mp3", b"ID3 direct".to_vec()).await;

    let tracks = [
        track("Artist", "Playlist", format!("{}/one/index.m3u8?extra=x", server.uri())),
        track("Artist", "Direct", format!("{}/direct/track.mp3", server.uri())),
        track("Artist", "Lossless", format!("{}/direct/track.flac", server.uri())),
        track("Artist", "Unavailable", String::new()),
    ];

    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    let pipeline = Pipeline::new(&config(output.path(), "cp"))
        .unwrap()
        .with_events(event_tx);
    let summary = pipeline.run(&tracks).await.unwrap();

    assert_eq!(
        summary,
        Summary {
            completed: 2,
            skipped: 2,
            failed: 0,
        }
    );

    assert_eq!(
        files_in(output.path()),
        ["1. Artist — Playlist.mp3", "2. Artist — Direct.mp3"]
    );
    assert_eq!(
        fs::read(output.path().join("1. Artist — Playlist.mp3")).unwrap(),
        assembled
    );
    assert_eq!(
        fs::read(output.path().join("2. Artist — Direct.mp3")).unwrap(),
        b"ID3 direct"
    );

    let mut events = Vec::new();
    while let Ok(event) = event_rx.try_recv() {
        events.push(event);
    }

    assert!(events.contains(&Event::BlockAppended {
        index: 1,
        block: 2,
        blocks: 3,
        bytes: 50,
    }));
    assert!(events.contains(&Event::TrackCompleted {
        index: 1,
        route: Route::PlaylistAssembly,
    }));
    assert!(events.contains(&Event::TrackCompleted {
        index: 2,
        route: Route::DirectDownload,
    }));
    assert!(events
        .iter()
        .any(|event| matches!(event, Event::TrackSkipped { index: 3, .. })));
}

#[tokio::test]
async fn failed_key_fetch_ends_only_that_track() {
    let server = MockServer::start().await;
    let output = tempfile::tempdir().unwrap();

    // Only the second playlist has a reachable key.
    let playlist = "#EXTM3U\n\
                    #EXT-X-KEY:METHOD=AES-128,URI=\"/missing/key.pub\"\n\
                    #EXTINF:10.000,\n\
                    seg-1.ts\n";
    serve(&server, "/broken/index.m3u8", playlist).await;
    serve(&server, "/broken/seg-1.ts", vec![0u8; 32]).await;

    serve(&server, "/keys/key.pub", KEY.to_vec()).await;
    let assembled = serve_playlist(&server, "two").await;

    let tracks = [
        track("A", "Broken", format!("{}/broken/index.m3u8", server.uri())),
        track("B", "Fine", format!("{}/two/index.m3u8", server.uri())),
    ];

    let pipeline = Pipeline::new(&config(output.path(), "cp")).unwrap();
    let summary = pipeline.run(&tracks).await.unwrap();

    assert_eq!(summary.failed, 1);
    assert_eq!(summary.completed, 1);
    assert_eq!(files_in(output.path()), ["2. B — Fine.mp3"]);
    assert_eq!(
        fs::read(output.path().join("2. B — Fine.mp3")).unwrap(),
        assembled
    );
}

#[tokio::test]
async fn intermediate_file_is_removed_when_encoding_fails() {
    let server = MockServer::start().await;
    let output = tempfile::tempdir().unwrap();

    serve(&server, "/keys/key.pub", KEY.to_vec()).await;
    serve_playlist(&server, "one").await;

    let tracks = [track(
        "Artist",
        "Title",
        format!("{}/one/index.m3u8", server.uri()),
    )];

    let pipeline = Pipeline::new(&config(output.path(), "false")).unwrap();
    let summary = pipeline.run(&tracks).await.unwrap();

    assert_eq!(summary.failed, 1);
    assert!(files_in(output.path()).is_empty());
}

#[tokio::test]
async fn malformed_playlist_is_skipped() {
    let server = MockServer::start().await;
    let output = tempfile::tempdir().unwrap();

    // No key declaration at all.
    serve(&server, "/bad/index.m3u8", "#EXTM3U\n#EXTINF:10.000,\nseg-1.ts\n").await;

    let tracks = [track("A", "B", format!("{}/bad/index.m3u8", server.uri()))];
    let pipeline = Pipeline::new(&config(output.path(), "cp")).unwrap();
    let summary = pipeline.run(&tracks).await.unwrap();

    assert_eq!(summary.failed, 1);
    assert!(files_in(output.path()).is_empty());
}

#[tokio::test]
async fn path_separators_are_stripped_from_names() {
    let server = MockServer::start().await;
    let output = tempfile::tempdir().unwrap();
    serve(&server, "/direct/track.mp3", b"data".to_vec()).await;

    let tracks = [track(
        "AC/DC",
        "Back\\In Black",
        format!("{}/direct/track.mp3", server.uri()),
    )];
    let pipeline = Pipeline::new(&config(output.path(), "cp")).unwrap();
    pipeline.run(&tracks).await.unwrap();

    assert_eq!(files_in(output.path()), ["1. ACDC — BackIn Black.mp3"]);
}

#[tokio::test]
async fn failed_direct_download_leaves_no_file() {
    let server = MockServer::start().await;
    let output = tempfile::tempdir().unwrap();

    let tracks = [track("A", "Gone", format!("{}/gone.mp3", server.uri()))];
    let pipeline = Pipeline::new(&config(output.path(), "cp")).unwrap();
    let summary = pipeline.run(&tracks).await.unwrap();

    assert_eq!(summary.failed, 1);
    assert!(files_in(output.path()).is_empty());
}

#[tokio::test]
async fn cancelled_run_leaves_no_intermediate_file() {
    let server = MockServer::start().await;
    let output = tempfile::tempdir().unwrap();

    serve(&server, "/keys/key.pub", KEY.to_vec()).await;
    serve_playlist(&server, "one").await;

    // An encoder that outlives the run.
    let config = Config {
        output_dir: output.path().to_path_buf(),
        encoder: EncoderConfig {
            program: PathBuf::from("sleep"),
            args: vec!["30".to_owned()],
        },
        ..Config::new()
    };

    let tracks = [track("A", "B", format!("{}/one/index.m3u8", server.uri()))];
    let pipeline = Pipeline::new(&config).unwrap();
    let result = tokio::time::timeout(Duration::from_secs(1), pipeline.run(&tracks)).await;

    assert!(result.is_err());
    assert!(files_in(output.path()).is_empty());
}
