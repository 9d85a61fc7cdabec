use mailroute::{MapResponse, NetstringCodec};
use tokio::io::AsyncWriteExt;
use tokio_stream::StreamExt;
use tokio_util::codec::FramedRead;

#[tokio::test]
async fn codec_reads_responses_split_across_writes() {
    let (client, mut server) = tokio::io::duplex(64);
    let mut framed = FramedRead::new(client, NetstringCodec::new(4096));

    let writer = tokio::spawn(async move {
        for piece in [&b"3:OK"[..], b" ,9:NOTF", b"OUND ,20:OK example.com/user/,"] {
            server.write_all(piece).await.unwrap();
            tokio::task::yield_now().await;
        }
    });

    let mut responses = Vec::new();
    while let Some(frame) = framed.next().await {
        let payload = frame.expect("valid netstring");
        responses.push(MapResponse::from_payload(&payload).unwrap());
    }
    writer.await.unwrap();

    assert_eq!(
        responses,
        vec![
            MapResponse::Found(None),
            MapResponse::NotFound,
            MapResponse::Found(Some("example.com/user/".to_string())),
        ]
    );
}

#[tokio::test]
async fn codec_rejects_missing_terminator() {
    let (client, mut server) = tokio::io::duplex(64);
    let mut framed = FramedRead::new(client, NetstringCodec::new(4096));

    server.write_all(b"3:OK x").await.unwrap();
    drop(server);

    assert!(framed.next().await.unwrap().is_err());
}
