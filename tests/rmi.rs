//! RMI runtime integration tests: a small echo interface served by a
//! skeleton and driven through a hand-rolled stub, the same shape the
//! filesystem interfaces use.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::sleep;

use tundra::rmi::codec;
use tundra::rmi::message::{type_ref, MethodSig, Request, Response};
use tundra::rmi::skeleton::{Dispatch, Skeleton, SkeletonHooks};
use tundra::rmi::stub::{call, StubAddr};
use tundra::rmi::RmiError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
enum EchoError {
    #[error("refused: {0}")]
    Refused(String),
    #[error(transparent)]
    Rmi(#[from] RmiError),
}

#[async_trait]
trait Echo: Send + Sync {
    async fn echo(&self, message: String) -> Result<String, EchoError>;
    async fn refuse(&self, reason: String) -> Result<(), EchoError>;
}

fn echo_sig() -> MethodSig {
    let string = type_ref::<String>();
    MethodSig::new("echo", &[&string], &string)
}

fn refuse_sig() -> MethodSig {
    let string = type_ref::<String>();
    MethodSig::new("refuse", &[&string], &type_ref::<()>())
}

struct EchoServer;

#[async_trait]
impl Echo for EchoServer {
    async fn echo(&self, message: String) -> Result<String, EchoError> {
        Ok(message)
    }

    async fn refuse(&self, reason: String) -> Result<(), EchoError> {
        Err(EchoError::Refused(reason))
    }
}

struct EchoDispatch(Arc<EchoServer>);

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, RmiError> {
    bincode::serialize(value).map_err(|err| RmiError::Codec(err.to_string()))
}

fn respond<T: Serialize, E: Serialize>(outcome: Result<T, E>) -> Result<Response, RmiError> {
    match outcome {
        Ok(value) => Ok(Response::Return(encode(&value)?)),
        Err(error) => Ok(Response::MethodException(encode(&error)?)),
    }
}

#[async_trait]
impl Dispatch for EchoDispatch {
    fn interface(&self) -> &'static str {
        "Echo"
    }

    async fn dispatch(&self, request: Request) -> Result<Response, RmiError> {
        let Request { sig, args } = request;
        match sig.name.as_str() {
            "echo" => {
                if sig != echo_sig() {
                    return Err(RmiError::SignatureMismatch(sig.name));
                }
                let (message,): (String,) = bincode::deserialize(&args)
                    .map_err(|err| RmiError::Codec(err.to_string()))?;
                respond(self.0.echo(message).await)
            }
            "refuse" => {
                if sig != refuse_sig() {
                    return Err(RmiError::SignatureMismatch(sig.name));
                }
                let (reason,): (String,) = bincode::deserialize(&args)
                    .map_err(|err| RmiError::Codec(err.to_string()))?;
                respond(self.0.refuse(reason).await)
            }
            _ => Err(RmiError::UnknownMethod(sig.name)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
struct EchoStub {
    addr: StubAddr,
}

#[async_trait]
impl Echo for EchoStub {
    async fn echo(&self, message: String) -> Result<String, EchoError> {
        call(&self.addr, echo_sig(), &(message,)).await
    }

    async fn refuse(&self, reason: String) -> Result<(), EchoError> {
        call(&self.addr, refuse_sig(), &(reason,)).await
    }
}

#[derive(Default)]
struct CountingHooks {
    service_errors: AtomicUsize,
    stops: AtomicUsize,
}

impl SkeletonHooks for CountingHooks {
    fn service_error(&self, _error: &RmiError) {
        self.service_errors.fetch_add(1, Ordering::SeqCst);
    }

    fn stopped(&self, _cause: Option<&RmiError>) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }
}

fn skeleton() -> Skeleton {
    Skeleton::new(Arc::new(EchoDispatch(Arc::new(EchoServer))), None)
}

fn skeleton_with_hooks(hooks: Arc<CountingHooks>) -> Skeleton {
    Skeleton::with_hooks(Arc::new(EchoDispatch(Arc::new(EchoServer))), None, hooks)
}

fn stub_for(skeleton: &Skeleton) -> EchoStub {
    EchoStub { addr: StubAddr::for_skeleton(skeleton).unwrap() }
}

async fn wait_for(condition: impl Fn() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

#[tokio::test]
async fn values_round_trip_unchanged() {
    let server = skeleton();
    server.start().unwrap();
    let stub = stub_for(&server);
    for message in ["", "hello", "snow \u{2744} and unicode"] {
        assert_eq!(stub.echo(message.to_owned()).await.unwrap(), message);
    }
    server.stop();
}

#[tokio::test]
async fn concurrent_calls_share_one_stub() {
    let server = skeleton();
    server.start().unwrap();
    let stub = stub_for(&server);

    let mut calls = Vec::new();
    for index in 0..16 {
        let stub = stub.clone();
        calls.push(tokio::spawn(async move {
            stub.echo(format!("message {index}")).await.unwrap()
        }));
    }
    for (index, handle) in calls.into_iter().enumerate() {
        assert_eq!(handle.await.unwrap(), format!("message {index}"));
    }
    server.stop();
}

#[tokio::test]
async fn declared_errors_keep_their_cause() {
    let server = skeleton();
    server.start().unwrap();
    let stub = stub_for(&server);
    let error = stub.refuse("not today".to_owned()).await.unwrap_err();
    assert_eq!(error, EchoError::Refused("not today".to_owned()));
    server.stop();
}

#[tokio::test]
async fn stub_identity_is_local() {
    let a = EchoStub { addr: StubAddr::new("peer.example", 9000) };
    let b = EchoStub { addr: StubAddr::new("peer.example", 9000) };
    // no skeleton is listening anywhere; equality must not dial
    assert_eq!(a, b);
    assert_ne!(a, EchoStub { addr: StubAddr::new("peer.example", 9001) });
}

#[tokio::test]
async fn unknown_methods_surface_as_rmi_exceptions() {
    let hooks = Arc::new(CountingHooks::default());
    let server = skeleton_with_hooks(hooks.clone());
    server.start().unwrap();
    let addr = server.local_addr().unwrap();

    let mut socket = TcpStream::connect(addr).await.unwrap();
    let bogus = Request {
        sig: MethodSig::new("vanish", &[], "()"),
        args: Vec::new(),
    };
    codec::write_frame(&mut socket, &bogus).await.unwrap();
    let response: Response = codec::read_frame(&mut socket).await.unwrap();
    socket.shutdown().await.unwrap();
    assert!(matches!(
        response,
        Response::RmiException(RmiError::UnknownMethod(name)) if name == "vanish"
    ));
    wait_for(|| hooks.service_errors.load(Ordering::SeqCst) == 1).await;
    server.stop();
}

#[tokio::test]
async fn mismatched_signatures_are_rejected() {
    let server = skeleton();
    server.start().unwrap();
    let addr = server.local_addr().unwrap();

    let mut socket = TcpStream::connect(addr).await.unwrap();
    let wrong = Request {
        sig: MethodSig::new("echo", &["u64"], "u64"),
        args: bincode::serialize(&(7u64,)).unwrap(),
    };
    codec::write_frame(&mut socket, &wrong).await.unwrap();
    let response: Response = codec::read_frame(&mut socket).await.unwrap();
    assert!(matches!(
        response,
        Response::RmiException(RmiError::SignatureMismatch(name)) if name == "echo"
    ));
    server.stop();
}

#[tokio::test]
async fn unstarted_skeletons_have_no_address() {
    let server = skeleton();
    assert!(server.local_addr().is_none());
    assert_eq!(StubAddr::for_skeleton(&server).unwrap_err(), RmiError::NotStarted);
    // stopping a never-started skeleton is a harmless no-op
    server.stop();
}

#[tokio::test]
async fn double_start_is_rejected() {
    let server = skeleton();
    server.start().unwrap();
    assert_eq!(server.start().unwrap_err(), RmiError::AlreadyStarted);
    server.stop();
}

#[tokio::test]
async fn stopping_fires_the_hook_once_and_refuses_calls() {
    let hooks = Arc::new(CountingHooks::default());
    let server = skeleton_with_hooks(hooks.clone());
    server.start().unwrap();
    let stub = stub_for(&server);
    assert_eq!(stub.echo("up".to_owned()).await.unwrap(), "up");

    server.stop();
    wait_for(|| hooks.stops.load(Ordering::SeqCst) == 1).await;
    server.stop();
    sleep(Duration::from_millis(50)).await;
    assert_eq!(hooks.stops.load(Ordering::SeqCst), 1);

    let error = stub.echo("down".to_owned()).await.unwrap_err();
    assert!(matches!(error, EchoError::Rmi(_)));
}

#[tokio::test]
async fn other_servers_survive_a_stopped_peer() {
    let hooks = Arc::new(CountingHooks::default());
    let doomed = skeleton_with_hooks(hooks.clone());
    let healthy = skeleton();
    doomed.start().unwrap();
    healthy.start().unwrap();
    let doomed_stub = stub_for(&doomed);
    let healthy_stub = stub_for(&healthy);

    doomed.stop();
    wait_for(|| hooks.stops.load(Ordering::SeqCst) == 1).await;
    assert!(doomed_stub.echo("lost".to_owned()).await.is_err());
    assert_eq!(healthy_stub.echo("fine".to_owned()).await.unwrap(), "fine");
    healthy.stop();
}

#[tokio::test]
async fn skeletons_restart_from_stopped() {
    let hooks = Arc::new(CountingHooks::default());
    let server = skeleton_with_hooks(hooks.clone());
    server.start().unwrap();
    server.stop();
    wait_for(|| hooks.stops.load(Ordering::SeqCst) == 1).await;

    server.start().unwrap();
    let stub = stub_for(&server);
    assert_eq!(stub.echo("again".to_owned()).await.unwrap(), "again");
    server.stop();
}
