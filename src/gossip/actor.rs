//! The body of the dedicated gossip worker: accept loop, outbound
//! broadcast, and per-connection read loops. Everything here runs on the
//! single-threaded runtime [`super::spawn`] builds; `tokio::spawn` still
//! requires `Send` futures, but no task ever crosses back onto the main
//! thread pool.

use {
  super::GossipOutbound,
  crate::{
    primitives::Address,
    runtime::{Job, Runtime},
    signing::verify_personal_signature,
    wire::GossipFrame,
  },
  futures::{SinkExt, StreamExt},
  std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{Arc, Mutex},
    time::Duration,
  },
  tokio::{
    net::{TcpListener, TcpStream},
    sync::mpsc,
    time::timeout,
  },
  tokio_tungstenite::{accept_async, connect_async, tungstenite::Message},
};

type ConnMap = Arc<Mutex<HashMap<String, mpsc::UnboundedSender<Message>>>>;

/// Connect timeout when dialing a peer to push a vote (spec.md §4.F).
const DIAL_TIMEOUT: Duration = Duration::from_secs(2);
/// How long an accepted connection may sit idle before this node pings it.
const IDLE_TIMEOUT: Duration = Duration::from_secs(20);
/// How long a peer has to answer a liveness ping before the connection is
/// closed.
const PONG_DEADLINE: Duration = Duration::from_secs(10);

pub async fn run(
  own: Address,
  port: u16,
  mut outbound_rx: mpsc::Receiver<GossipOutbound>,
  runtime: Arc<Runtime>,
) {
  let listener = match TcpListener::bind(("0.0.0.0", port)).await {
    Ok(listener) => listener,
    Err(e) => {
      tracing::error!(error = %e, port, "gossip worker failed to bind, exiting");
      return;
    }
  };
  tracing::info!(port, "gossip worker listening");

  // Owned exclusively by tasks spawned from this worker thread: no
  // other part of the process ever touches this map.
  let connections: ConnMap = Arc::new(Mutex::new(HashMap::new()));

  loop {
    tokio::select! {
      accepted = listener.accept() => {
        match accepted {
          Ok((stream, peer)) => {
            tokio::spawn(handle_inbound(stream, peer, runtime.clone()));
          }
          Err(e) => tracing::warn!(error = %e, "gossip accept failed"),
        }
      }
      Some(outbound) = outbound_rx.recv() => {
        tokio::spawn(broadcast(own, outbound, connections.clone()));
      }
    }
  }
}

async fn broadcast(own: Address, outbound: GossipOutbound, connections: ConnMap) {
  let payload = match serde_json::to_string(&outbound.frame) {
    Ok(payload) => payload,
    Err(e) => {
      tracing::warn!(error = %e, "failed to encode gossip frame");
      return;
    }
  };

  for peer in outbound.peer_addresses.iter().filter(|p| p.address != own) {
    let addr = peer.websocket_addr();
    let Some(sender) = get_or_dial(&addr, &connections).await else { continue };
    if sender.send(Message::Text(payload.clone())).is_err() {
      connections.lock().unwrap().remove(&addr);
    }
  }
}

/// Reuses an existing outbound connection, or dials a fresh one with a
/// 2s timeout (spec.md §4.F send path). A dial failure is logged and
/// skipped, never retried: gossip is best-effort.
async fn get_or_dial(addr: &str, connections: &ConnMap) -> Option<mpsc::UnboundedSender<Message>> {
  if let Some(sender) = connections.lock().unwrap().get(addr).cloned() {
    return Some(sender);
  }

  let url = format!("ws://{addr}");
  let (stream, _response) = match timeout(DIAL_TIMEOUT, connect_async(&url)).await {
    Ok(Ok(pair)) => pair,
    Ok(Err(e)) => {
      tracing::warn!(%addr, error = %e, "gossip dial failed");
      return None;
    }
    Err(_) => {
      tracing::warn!(%addr, "gossip dial timed out");
      return None;
    }
  };

  let (mut write, _read) = stream.split();
  let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
  tokio::spawn(async move {
    while let Some(msg) = rx.recv().await {
      if write.send(msg).await.is_err() {
        break;
      }
    }
  });
  connections.lock().unwrap().insert(addr.to_owned(), tx.clone());
  Some(tx)
}

/// Reads frames off one accepted connection until it closes or misses a
/// liveness deadline (spec.md §4.F receive path).
async fn handle_inbound(stream: TcpStream, peer: SocketAddr, runtime: Arc<Runtime>) {
  let mut ws = match accept_async(stream).await {
    Ok(ws) => ws,
    Err(e) => {
      tracing::warn!(%peer, error = %e, "gossip inbound handshake failed");
      return;
    }
  };

  loop {
    let message = match timeout(IDLE_TIMEOUT, ws.next()).await {
      Ok(Some(Ok(message))) => message,
      Ok(Some(Err(e))) => {
        tracing::warn!(%peer, error = %e, "gossip read error");
        break;
      }
      Ok(None) => break,
      Err(_) => {
        if ws.send(Message::Ping(Vec::new())).await.is_err() {
          break;
        }
        match timeout(PONG_DEADLINE, ws.next()).await {
          Ok(Some(Ok(Message::Pong(_)))) => continue,
          _ => {
            tracing::warn!(%peer, "gossip peer missed pong deadline, closing");
            break;
          }
        }
      }
    };

    match message {
      Message::Text(text) => handle_frame(&text, &runtime).await,
      Message::Ping(payload) => {
        let _ = ws.send(Message::Pong(payload)).await;
      }
      Message::Close(_) => break,
      _ => {}
    }
  }
  let _ = ws.close(None).await;
}

async fn handle_frame(text: &str, runtime: &Arc<Runtime>) {
  let frame: GossipFrame = match serde_json::from_str(text) {
    Ok(frame) => frame,
    Err(e) => {
      tracing::warn!(error = %e, "malformed gossip frame, dropping");
      return;
    }
  };

  let wire = frame.vote;
  let payload = wire.signed_payload();
  if let Err(e) = verify_personal_signature(&payload, &wire.signature, wire.user_id) {
    tracing::warn!(error = %e, "gossip vote failed signature check, dropping");
    return;
  }

  let event = match runtime.store.get_event(wire.event_id) {
    Ok(Some(event)) => event,
    Ok(None) => return,
    Err(e) => {
      tracing::error!(error = %e, "store error handling gossip vote");
      return;
    }
  };
  if !event.in_voting_window(crate::primitives::now()) {
    return;
  }
  match runtime.store.get_metadata(wire.event_id) {
    Ok(Some(meta)) if meta.is_consensus_reached => return,
    Ok(_) => {}
    Err(e) => {
      tracing::error!(error = %e, "store error handling gossip vote");
      return;
    }
  }
  match runtime.store.exists_participant(wire.event_id, wire.user_id) {
    Ok(true) => {}
    Ok(false) => return,
    Err(e) => {
      tracing::error!(error = %e, "store error handling gossip vote");
      return;
    }
  }

  let event_id = wire.event_id;
  let vote = wire.into_vote();
  match runtime.store.get_vote(event_id, vote.user_id) {
    Ok(Some(existing)) if !vote.supersedes(&existing) => return,
    Ok(_) => {}
    Err(e) => {
      tracing::error!(error = %e, "store error handling gossip vote");
      return;
    }
  }
  if let Err(e) = runtime.store.put_vote(&vote) {
    tracing::error!(error = %e, "failed to persist gossiped vote");
    return;
  }
  runtime.scheduler.enqueue(Job::ConsensusCheck(event_id)).await;
}
