use meridian_core::ErrorKind;
use meridian_fabric::{
    balancer::{LoadBalancer, RandomBalancer},
    endpoint::Endpoint,
    error::Error,
    resolver::{Resolver, StaticResolver},
    transport::{
        self, Connector, DefaultConnector, TcpConnector, TcpTransportListener, TransportListener,
        UnixConnector, UnixTransportListener,
    },
};
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

fn socket_path(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("meridian_test_{name}_{}.sock", std::process::id()))
}

/// Helper to get a free port
async fn get_listener() -> (TcpTransportListener, std::net::SocketAddr) {
    let listener = TcpTransportListener::bind("127.0.0.1:0".parse().unwrap())
        .await
        .unwrap();
    let addr = listener.local_addr().unwrap();
    (listener, addr)
}

/// Accept one connection and echo everything back until EOF
fn spawn_echo(mut listener: Box<dyn TransportListener>) {
    tokio::spawn(async move {
        let (mut transport, _peer) = listener.accept().await.unwrap();
        let mut buf = [0u8; 1024];
        loop {
            let n = transport.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            transport.write_all(&buf[..n]).await.unwrap();
        }
    });
}

#[tokio::test]
async fn tcp_connector_reaches_listener() {
    let (listener, addr) = get_listener().await;
    spawn_echo(Box::new(listener));

    let mut client = TcpConnector::new().connect(addr).await.unwrap();
    assert!(client.nodelay().unwrap());
    client.write_all(b"hello world").await.unwrap();

    let mut response = [0u8; 11];
    client.read_exact(&mut response).await.unwrap();
    assert_eq!(&response, b"hello world");
}

#[tokio::test]
async fn tcp_listener_reports_peer_and_endpoint() {
    let (mut listener, addr) = get_listener().await;
    assert_eq!(listener.local_endpoint().unwrap(), Endpoint::Tcp(addr));

    let client = tokio::spawn(async move { TcpConnector::new().nodelay(false).connect(addr).await });
    let (_transport, peer) = listener.accept().await.unwrap();
    let client = client.await.unwrap().unwrap();
    assert_eq!(peer, client.local_addr().unwrap().to_string());
}

#[tokio::test]
async fn bind_picks_a_free_port() {
    let listener = transport::bind(&"127.0.0.1:0".parse().unwrap()).await.unwrap();
    match listener.local_endpoint().unwrap() {
        Endpoint::Tcp(addr) => assert_ne!(addr.port(), 0),
        other => panic!("expected a tcp endpoint, got {other}"),
    }
}

#[tokio::test]
async fn default_connector_dials_both_transports() {
    let connector = DefaultConnector::default();

    let tcp = transport::bind(&"127.0.0.1:0".parse().unwrap()).await.unwrap();
    let tcp_endpoint = tcp.local_endpoint().unwrap();
    spawn_echo(tcp);

    let path = socket_path("default_connector");
    let unix = transport::bind(&Endpoint::Unix(path.clone())).await.unwrap();
    let unix_endpoint = unix.local_endpoint().unwrap();
    spawn_echo(unix);

    for endpoint in [tcp_endpoint, unix_endpoint] {
        let mut stream = connector.connect(&endpoint).await.unwrap();
        stream.write_all(b"ping").await.unwrap();
        let mut response = [0u8; 4];
        stream.read_exact(&mut response).await.unwrap();
        assert_eq!(&response, b"ping", "echo over {endpoint}");
    }
}

#[tokio::test]
async fn connect_refused_is_an_io_error() {
    let (listener, addr) = get_listener().await;
    drop(listener);

    let result = TcpConnector::new()
        .connect_timeout(Duration::from_secs(1))
        .connect(addr)
        .await;
    let error = match result {
        Err(error @ Error::Io(_)) => error,
        other => panic!("expected an io error, got {other:?}"),
    };
    let error: meridian_core::RpcError = error.into();
    assert_eq!(error.kind(), ErrorKind::ConnectFailure);
}

#[tokio::test]
async fn unix_connector_reaches_listener() {
    let path = socket_path("unix_connector");
    let listener = UnixTransportListener::bind(&path).await.unwrap();
    spawn_echo(Box::new(listener));

    let mut client = UnixConnector::new()
        .connect_timeout(Duration::from_secs(1))
        .connect(&path)
        .await
        .unwrap();
    client.write_all(b"hello unix").await.unwrap();
    let mut response = [0u8; 10];
    client.read_exact(&mut response).await.unwrap();
    assert_eq!(&response, b"hello unix");
}

#[tokio::test]
async fn unix_listener_cleans_up_socket() {
    let path = socket_path("cleanup");

    // A stale file from an earlier run does not prevent binding
    std::fs::write(&path, b"stale").unwrap();
    {
        let listener = UnixTransportListener::bind(&path).await.unwrap();
        assert_eq!(listener.path(), path.as_path());
        assert!(path.exists());
    }

    assert!(!path.exists());
}

#[tokio::test]
async fn unix_connect_to_missing_socket_fails() {
    let path = socket_path("missing");
    let _ = std::fs::remove_file(&path);

    let result = UnixConnector::new().connect(&path).await;
    assert!(matches!(result, Err(Error::Io(_))));
}

#[test]
fn endpoints_parse_and_display() {
    let tcp: Endpoint = "127.0.0.1:8080".parse().unwrap();
    assert_eq!(tcp, Endpoint::Tcp("127.0.0.1:8080".parse().unwrap()));
    assert_eq!(tcp.to_string(), "127.0.0.1:8080");

    let v6: Endpoint = "[::1]:9000".parse().unwrap();
    assert!(matches!(v6, Endpoint::Tcp(addr) if addr.is_ipv6()));

    let unix: Endpoint = "unix:/tmp/meridian.sock".parse().unwrap();
    assert_eq!(unix, Endpoint::Unix(PathBuf::from("/tmp/meridian.sock")));
    assert_eq!(unix.to_string(), "unix:/tmp/meridian.sock");
    assert_eq!("unix:///tmp/meridian.sock".parse::<Endpoint>().unwrap(), unix);
    assert_eq!(unix.to_string().parse::<Endpoint>().unwrap(), unix);

    for bad in ["", "unix:", "localhost", "127.0.0.1"] {
        assert!(
            matches!(bad.parse::<Endpoint>(), Err(Error::InvalidEndpoint(_))),
            "{bad:?} should not parse"
        );
    }
}

#[tokio::test]
async fn static_resolver_splits_target_lists() {
    let endpoints = StaticResolver
        .resolve("127.0.0.1:1, 127.0.0.1:2,unix:/tmp/a.sock")
        .await
        .unwrap();
    assert_eq!(endpoints.len(), 3);
    assert_eq!(endpoints[2], Endpoint::Unix(PathBuf::from("/tmp/a.sock")));

    assert!(StaticResolver.resolve("127.0.0.1:1,bogus").await.is_err());
}

#[test]
fn random_balancer_picks_a_candidate() {
    let candidates: Vec<Endpoint> = (1..=4)
        .map(|port| format!("127.0.0.1:{port}").parse().unwrap())
        .collect();
    for _ in 0..32 {
        let picked = RandomBalancer.pick(&candidates).unwrap();
        assert!(candidates.contains(&picked));
    }
    assert_eq!(RandomBalancer.pick(&[]), None);
}
