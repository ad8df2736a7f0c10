//! Per-connection query dispatch.

use crate::wire;
use reql_core::error::{Error, Result};
use reql_core::proto::{QueryOp, ResponseType};
use reql_session::{JobsRegistry, QueryCache, QueryParams, Response};
use reql_eval::Interruptor;
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{debug, info};

type SharedWriter = Arc<Mutex<OwnedWriteHalf>>;

/// Drive one client connection until EOF.
///
/// Every frame runs on its own task; the connection-wide interruptor is
/// pulsed when the reader stops, aborting whatever is still in flight.
pub(crate) async fn handle_connection(
    socket: TcpStream,
    peer: SocketAddr,
    registry: Arc<JobsRegistry>,
    return_empty_normal_batches: bool,
) {
    let cache = QueryCache::new(&registry, peer, return_empty_normal_batches);
    let (mut reader, writer) = socket.into_split();
    let writer: SharedWriter = Arc::new(Mutex::new(writer));
    let interruptor = Interruptor::new();

    loop {
        match wire::read_frame(&mut reader).await {
            Ok(Some((token, body))) => {
                let cache = Arc::clone(&cache);
                let writer = Arc::clone(&writer);
                let interruptor = interruptor.clone();
                tokio::spawn(async move {
                    dispatch(cache, writer, interruptor, token, body).await;
                });
            }
            Ok(None) => break,
            Err(err) => {
                debug!(%peer, error = %err, "connection read failed");
                break;
            }
        }
    }

    interruptor.pulse();
    info!(%peer, "connection closed");
}

async fn dispatch(
    cache: Arc<QueryCache>,
    writer: SharedWriter,
    interruptor: Interruptor,
    token: i64,
    body: Value,
) {
    let (op, term, optargs) = match parse_query_frame(&body) {
        Ok(parts) => parts,
        Err(err) => {
            write_response(&writer, token, &Response::from_error(&err)).await;
            return;
        }
    };

    let mut params = QueryParams::new(&cache, token, op, term, optargs);
    let noreply = params.noreply;

    let outcome = match op {
        QueryOp::Start => run_query(&cache, &mut params, &interruptor).await,
        QueryOp::Continue => continue_query(&cache, &mut params, &interruptor).await,
        QueryOp::Stop => {
            cache.terminate(&mut params);
            let mut res = Response::new();
            res.set_type(ResponseType::SuccessSequence);
            Ok(res)
        }
        QueryOp::NoreplyWait => cache.noreply_wait(&params, &interruptor).await.map(|_| {
            let mut res = Response::new();
            res.set_type(ResponseType::WaitComplete);
            res
        }),
    };

    match outcome {
        Ok(res) => {
            if !noreply {
                write_response(&writer, token, &res).await;
            }
        }
        // The connection is going away; there is nobody to answer.
        Err(Error::Interrupted) => {}
        Err(err) => {
            if !noreply {
                write_response(&writer, token, &Response::from_error(&err)).await;
            }
        }
    }
}

fn parse_query_frame(body: &Value) -> Result<(QueryOp, Option<Value>, Option<Value>)> {
    let parts = body
        .as_array()
        .ok_or_else(|| Error::client("Expected a query in the form [TYPE, TERM, OPTARGS]."))?;
    let op = parts
        .first()
        .and_then(Value::as_u64)
        .and_then(QueryOp::from_wire)
        .ok_or_else(|| Error::client("Unrecognized query type."))?;
    Ok((op, parts.get(1).cloned(), parts.get(2).cloned()))
}

async fn run_query(
    cache: &Arc<QueryCache>,
    params: &mut QueryParams,
    interruptor: &Interruptor,
) -> Result<Response> {
    let mut query_ref = cache.create(params, interruptor).await?;
    let mut res = Response::new();
    query_ref.fill_response(&mut res).await?;
    Ok(res)
}

async fn continue_query(
    cache: &Arc<QueryCache>,
    params: &mut QueryParams,
    interruptor: &Interruptor,
) -> Result<Response> {
    let mut query_ref = cache.get(params, interruptor).await?;
    let mut res = Response::new();
    query_ref.fill_response(&mut res).await?;
    Ok(res)
}

async fn write_response(writer: &SharedWriter, token: i64, res: &Response) {
    let mut writer = writer.lock().await;
    if let Err(err) = wire::write_frame(&mut *writer, token, &res.to_wire()).await {
        debug!(error = %err, "failed to write response");
    }
}
