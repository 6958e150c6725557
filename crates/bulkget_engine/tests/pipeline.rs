mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use bulkget_engine::{
    FetchError, PipelineSettings, PipelinedConnection, ResponseOutcome, StoreRequest,
};
use common::{payload, read_request_path, ServerBehaviour};
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use url::Url;

fn request(index: usize) -> StoreRequest {
    StoreRequest::get(Url::parse(&format!("http://memory.test/bucket/obj/{index}")).unwrap())
}

fn settings(depth: usize) -> PipelineSettings {
    PipelineSettings {
        depth,
        max_body_bytes: 1024 * 1024,
    }
}

fn connect(behaviour: ServerBehaviour, count: usize, depth: usize) -> PipelinedConnection {
    let (client, server) = tokio::io::duplex(64 * 1024);
    tokio::spawn(common::serve(
        server,
        Arc::new(common::objects(count)),
        behaviour,
    ));
    PipelinedConnection::new(Box::new(client), settings(depth), &CancellationToken::new())
}

type Log = Arc<Mutex<Vec<(usize, ResponseOutcome)>>>;

fn recording(log: &Log, index: usize) -> impl FnOnce(ResponseOutcome) + Send + 'static {
    let log = Arc::clone(log);
    move |outcome| log.lock().unwrap().push((index, outcome))
}

#[tokio::test]
async fn idle_close_returns_immediately() {
    let (client, _server) = tokio::io::duplex(1024);
    let conn = PipelinedConnection::new(
        Box::new(client),
        PipelineSettings::default(),
        &CancellationToken::new(),
    );
    let closed = timeout(Duration::from_secs(1), conn.close())
        .await
        .expect("idle close must not block");
    assert_eq!(closed, Ok(()));
}

#[tokio::test]
async fn responses_reach_handlers_in_submission_order() {
    let behaviour = ServerBehaviour {
        jitter: true,
        mix_framing: true,
        ..ServerBehaviour::default()
    };
    let mut conn = connect(behaviour, 40, 8);
    let log: Log = Arc::default();

    for i in 0..40 {
        conn.queue_request(request(i), recording(&log, i))
            .await
            .expect("connection accepts requests");
    }
    assert_eq!(conn.close().await, Ok(()));

    let log = log.lock().unwrap();
    assert_eq!(log.len(), 40);
    for (position, (index, outcome)) in log.iter().enumerate() {
        assert_eq!(position, *index, "handlers must run in submission order");
        let response = outcome.as_ref().expect("response");
        assert_eq!(response.status.as_u16(), 200);
        assert_eq!(response.body.as_ref(), payload(*index).as_slice());
    }
}

#[tokio::test]
async fn transport_failure_invokes_every_handler_once() {
    common::init_logging();
    let behaviour = ServerBehaviour {
        fail_after: Some(3),
        ..ServerBehaviour::default()
    };
    let mut conn = connect(behaviour, 10, 16);
    let log: Log = Arc::default();

    for i in 0..10 {
        // A deferred request is still completed by close().
        let _ = conn.queue_request(request(i), recording(&log, i)).await;
    }
    let closed = conn.close().await;
    assert!(
        matches!(closed, Err(FetchError::Transport(_))),
        "unexpected close result {closed:?}"
    );

    let log = log.lock().unwrap();
    let mut counts = vec![0usize; 10];
    for (index, outcome) in log.iter() {
        counts[*index] += 1;
        match outcome {
            Ok(response) => assert_eq!(response.body.as_ref(), payload(*index).as_slice()),
            Err(err) => assert_eq!(err, &FetchError::ConnectionShutdown),
        }
    }
    assert_eq!(counts, vec![1; 10]);
    for (index, outcome) in log.iter() {
        if *index >= 3 {
            assert_eq!(outcome.as_ref().unwrap_err(), &FetchError::ConnectionShutdown);
        }
    }
}

#[tokio::test]
async fn requests_blocked_on_a_full_window_are_drained_on_failure() {
    let behaviour = ServerBehaviour {
        fail_after: Some(1),
        ..ServerBehaviour::default()
    };
    let mut conn = connect(behaviour, 10, 2);
    let log: Log = Arc::default();

    for i in 0..10 {
        let _ = conn.queue_request(request(i), recording(&log, i)).await;
    }
    assert!(conn.close().await.is_err());

    let log = log.lock().unwrap();
    let mut indices: Vec<usize> = log.iter().map(|(index, _)| *index).collect();
    indices.sort_unstable();
    assert_eq!(indices, (0..10).collect::<Vec<_>>());
    assert!(log
        .iter()
        .filter(|(index, _)| *index >= 1)
        .all(|(_, outcome)| outcome.as_ref().unwrap_err() == &FetchError::ConnectionShutdown));
}

#[tokio::test]
async fn queue_blocks_until_the_oldest_response_is_consumed() {
    let (client, server) = tokio::io::duplex(64 * 1024);
    let (release_tx, mut release_rx) = mpsc::unbounded_channel::<()>();

    // Reads requests as they arrive but only answers one per release.
    tokio::spawn(async move {
        let (read_half, mut write_half) = tokio::io::split(server);
        let mut reader = BufReader::new(read_half);
        while let Some(path) = read_request_path(&mut reader).await {
            if release_rx.recv().await.is_none() {
                return;
            }
            let response = format!("HTTP/1.1 200 OK\r\nContent-Length: {}\r\n\r\n{path}", path.len());
            if write_half.write_all(response.as_bytes()).await.is_err() {
                return;
            }
        }
    });

    let events = Arc::new(Mutex::new(Vec::<String>::new()));
    let (accepted_tx, mut accepted_rx) = mpsc::unbounded_channel::<usize>();
    let client_events = Arc::clone(&events);
    let client_task = tokio::spawn(async move {
        let mut conn =
            PipelinedConnection::new(Box::new(client), settings(2), &CancellationToken::new());
        for i in 0..3 {
            let events = Arc::clone(&client_events);
            conn.queue_request(request(i), move |outcome: ResponseOutcome| {
                assert!(outcome.is_ok());
                events.lock().unwrap().push(format!("handled {i}"));
            })
            .await
            .unwrap();
            client_events.lock().unwrap().push(format!("accepted {i}"));
            accepted_tx.send(i).unwrap();
        }
        conn.close().await
    });

    let wait = Duration::from_secs(2);
    assert_eq!(timeout(wait, accepted_rx.recv()).await.unwrap(), Some(0));
    assert_eq!(timeout(wait, accepted_rx.recv()).await.unwrap(), Some(1));
    assert!(
        timeout(Duration::from_millis(150), accepted_rx.recv())
            .await
            .is_err(),
        "third request must wait for a window slot"
    );

    release_tx.send(()).unwrap();
    assert_eq!(timeout(wait, accepted_rx.recv()).await.unwrap(), Some(2));

    release_tx.send(()).unwrap();
    release_tx.send(()).unwrap();
    let closed = timeout(wait, client_task).await.unwrap().unwrap();
    assert_eq!(closed, Ok(()));

    let events = events.lock().unwrap();
    let handled_first = events.iter().position(|e| e == "handled 0").unwrap();
    let accepted_third = events.iter().position(|e| e == "accepted 2").unwrap();
    assert!(handled_first < accepted_third, "events: {events:?}");
    assert_eq!(events.iter().filter(|e| e.starts_with("handled")).count(), 3);
}

#[tokio::test]
async fn malformed_response_fails_the_connection_and_drains() {
    common::init_logging();
    let (client, server) = tokio::io::duplex(64 * 1024);
    tokio::spawn(async move {
        let (read_half, mut write_half) = tokio::io::split(server);
        let mut reader = BufReader::new(read_half);
        let mut served = 0;
        while read_request_path(&mut reader).await.is_some() {
            let response: &[u8] = if served == 0 {
                b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok"
            } else {
                b"this is not http\r\n\r\n"
            };
            if write_half.write_all(response).await.is_err() {
                return;
            }
            served += 1;
        }
    });

    let mut conn = PipelinedConnection::new(Box::new(client), settings(8), &CancellationToken::new());
    let log: Log = Arc::default();
    for i in 0..5 {
        let _ = conn.queue_request(request(i), recording(&log, i)).await;
    }
    let closed = timeout(Duration::from_secs(2), conn.close()).await.unwrap();
    assert!(matches!(closed, Err(FetchError::Protocol(_))), "{closed:?}");

    let log = log.lock().unwrap();
    assert_eq!(log.len(), 5);
    let (first_index, first_outcome) = &log[0];
    assert_eq!(*first_index, 0);
    assert_eq!(first_outcome.as_ref().unwrap().body.as_ref(), b"ok");
    assert!(log[1..]
        .iter()
        .all(|(_, outcome)| outcome.as_ref().unwrap_err() == &FetchError::ConnectionShutdown));
}

#[tokio::test]
async fn oversized_chunk_header_drains_every_handler() {
    common::init_logging();
    let (client, server) = tokio::io::duplex(64 * 1024);
    tokio::spawn(async move {
        let (read_half, mut write_half) = tokio::io::split(server);
        let mut reader = BufReader::new(read_half);
        let mut served = 0;
        while read_request_path(&mut reader).await.is_some() {
            let response: &[u8] = if served == 0 {
                b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok"
            } else {
                b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n1\r\na\r\nffffffffffffffff\r\n"
            };
            if write_half.write_all(response).await.is_err() {
                return;
            }
            served += 1;
        }
    });

    let mut conn = PipelinedConnection::new(Box::new(client), settings(8), &CancellationToken::new());
    let log: Log = Arc::default();
    for i in 0..6 {
        let _ = conn.queue_request(request(i), recording(&log, i)).await;
    }
    let closed = timeout(Duration::from_secs(2), conn.close()).await.unwrap();
    assert!(matches!(closed, Err(FetchError::Protocol(_))), "{closed:?}");

    let log = log.lock().unwrap();
    let mut indices: Vec<usize> = log.iter().map(|(index, _)| *index).collect();
    indices.sort_unstable();
    assert_eq!(indices, (0..6).collect::<Vec<_>>());
    assert!(log
        .iter()
        .filter(|(index, _)| *index >= 1)
        .all(|(_, outcome)| outcome.as_ref().unwrap_err() == &FetchError::ConnectionShutdown));
}

#[tokio::test]
async fn cancelled_queue_defers_the_handler_to_close() {
    let (client, _server) = tokio::io::duplex(1024);
    let parent = CancellationToken::new();
    let mut conn = PipelinedConnection::new(Box::new(client), settings(4), &parent);
    parent.cancel();

    let log: Log = Arc::default();
    let queued = conn.queue_request(request(0), recording(&log, 0)).await;
    assert_eq!(queued, Err(FetchError::ConnectionShutdown));
    assert!(log.lock().unwrap().is_empty(), "handler must not run synchronously");

    assert_eq!(conn.close().await, Err(FetchError::Cancelled));
    let log = log.lock().unwrap();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].1.as_ref().unwrap_err(), &FetchError::ConnectionShutdown);
}
