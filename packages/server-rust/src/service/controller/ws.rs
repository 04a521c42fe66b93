//! WebSocket sessions for MESSAGE controllers.
//!
//! Each socket gets a reader task that feeds a bounded inbox and a single
//! processor that handles messages one at a time, in arrival order.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use docintake_core::{Envelope, Transport, Verb};
use futures_util::stream::SplitStream;
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, Instrument};

use super::writer::{FrameSink, SocketWriter};
use crate::network::{AppState, ConnectionHandle};
use crate::service::bridge::{ExecutionBridge, SpanAttributes};
use crate::service::error::OperationError;
use crate::service::operation::{InboundMessage, MessageCounter, Operation, Payload, SinkCallback, TokenSink};

/// Everything a session needs besides its socket.
#[derive(Clone)]
pub struct SessionContext {
    /// Controller name.
    pub name: Arc<str>,
    /// Route the socket was opened on.
    pub target: Arc<str>,
    pub operation: Arc<Operation>,
    pub bridge: ExecutionBridge,
    /// Close after the first handled message.
    pub close_after_response: bool,
}

pub(super) fn mount(name: Arc<str>, url: &str, operation: Operation, router: Router<AppState>) -> Router<AppState> {
    let operation = Arc::new(operation);
    let target: Arc<str> = Arc::from(url);

    let upgrade = move |State(state): State<AppState>, ws: WebSocketUpgrade| {
        let ctx = SessionContext {
            name: Arc::clone(&name),
            target: Arc::clone(&target),
            operation: Arc::clone(&operation),
            bridge: state.bridge.clone(),
            close_after_response: state.server.ws_close_after_response,
        };
        async move { accept(state, ws, ctx) }
    };

    router.route(url, get(upgrade))
}

fn accept(state: AppState, ws: WebSocketUpgrade, ctx: SessionContext) -> Response {
    let connection = &state.config.connection;
    ws.write_buffer_size(connection.ws_write_buffer_size)
        .max_write_buffer_size(connection.ws_max_write_buffer_size)
        .on_upgrade(move |socket| handle_socket(socket, state, ctx))
}

async fn handle_socket(socket: WebSocket, state: AppState, ctx: SessionContext) {
    let _in_flight = state.shutdown.in_flight_guard();
    let handle = state.registry.register(ctx.target.as_ref());
    let span = tracing::info_span!(
        "session",
        connection = handle.id.0,
        session_id = %uuid::Uuid::new_v4(),
        target = %ctx.target,
    );

    async {
        info!("socket opened");
        let (sender, receiver) = socket.split();
        let (inbox_tx, inbox_rx) = mpsc::channel(state.config.connection.inbound_queue_capacity.max(1));
        let reader = tokio::spawn(read_frames(receiver, inbox_tx, handle.cancellation()));

        let handled = run_session(ctx, SocketWriter::new(sender), inbox_rx, Arc::clone(&handle)).await;

        handle.disconnect();
        reader.abort();
        state.registry.remove(handle.id);
        info!(
            handled = handled.get(),
            open_secs = handle.connected_at.elapsed().as_secs_f64(),
            "socket closed"
        );
    }
    .instrument(span)
    .await;
}

/// Forwards data frames into the inbox until the peer closes or errors, then
/// cancels the connection.
async fn read_frames(
    mut receiver: SplitStream<WebSocket>,
    inbox: mpsc::Sender<InboundMessage>,
    cancel: CancellationToken,
) {
    loop {
        let frame = tokio::select! {
            () = cancel.cancelled() => break,
            frame = receiver.next() => frame,
        };
        let message = match frame {
            Some(Ok(Message::Text(text))) => InboundMessage::Text(text.as_str().to_owned()),
            Some(Ok(Message::Binary(bytes))) => InboundMessage::Binary(bytes),
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
            Some(Ok(Message::Close(_))) | None => break,
            Some(Err(err)) => {
                debug!(error = %err, "socket read failed");
                break;
            }
        };
        if inbox.send(message).await.is_err() {
            break;
        }
    }
    cancel.cancel();
}

/// Processes inbound messages until the inbox closes, the connection is
/// cancelled, a handler fails, or (one-shot) the first message is served.
/// Always ends with one close frame. Returns the final message count.
pub async fn run_session<S: FrameSink + 'static>(
    ctx: SessionContext,
    writer: SocketWriter<S>,
    mut inbox: mpsc::Receiver<InboundMessage>,
    connection: Arc<ConnectionHandle>,
) -> MessageCounter {
    let writer = Arc::new(writer.with_connection(Arc::clone(&connection)));
    let cancel = connection.cancellation();
    let mut counter = MessageCounter::default();

    loop {
        let message = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            message = inbox.recv() => match message {
                Some(message) => message,
                None => break,
            },
        };

        match handle_message(&ctx, &writer, message, counter, &cancel).await {
            Ok(()) => {
                counter.increment();
                if ctx.close_after_response {
                    break;
                }
            }
            Err(err) => {
                if !writer.is_closed() {
                    writer.notify_failure(&err).await;
                }
                break;
            }
        }
    }

    writer.close(writer.close_reason()).await;
    counter
}

async fn handle_message<S: FrameSink + 'static>(
    ctx: &SessionContext,
    writer: &Arc<SocketWriter<S>>,
    message: InboundMessage,
    counter: MessageCounter,
    cancel: &CancellationToken,
) -> Result<(), OperationError> {
    let quantity = counter.get();
    let attrs = SpanAttributes {
        name: ctx.name.to_string(),
        transport: Transport::Ws,
        method: Verb::Message,
        target: ctx.target.to_string(),
        body: Some(message.as_text().into_owned()),
        quantity: Some(quantity),
    };

    let payload = Payload::message(message, quantity, cancel.clone());
    let sink_target: Arc<dyn TokenSink> = writer.clone();
    let sink = SinkCallback::new(sink_target);
    let operation = Arc::clone(&ctx.operation);
    let frames_before = writer.frames();

    let value = ctx
        .bridge
        .execute(attrs, move |graph| async move {
            operation.call_message(graph, payload, sink).await
        })
        .await?;

    if writer.frames() == frames_before {
        writer.send_envelope(&Envelope::success(&value)).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use docintake_core::{ErrorCode, StreamToken};
    use serde_json::json;

    use super::super::writer::mock::RecordingSink;
    use super::*;
    use crate::network::ConnectionRegistry;
    use crate::service::graph::DependencyGraph;

    fn context(operation: Operation, close_after_response: bool) -> SessionContext {
        SessionContext {
            name: Arc::from("stream_test"),
            target: Arc::from("/stream"),
            operation: Arc::new(operation),
            bridge: ExecutionBridge::new(Arc::new(DependencyGraph::empty()), "test"),
            close_after_response,
        }
    }

    /// Streams each whitespace-separated word of the message as a token.
    fn words() -> Operation {
        Operation::message(|_graph, payload: Payload<InboundMessage>, sink: SinkCallback| async move {
            let text = payload.body.as_text().into_owned();
            for word in text.split_whitespace() {
                sink.send(&StreamToken::new(word)).await?;
            }
            Ok::<_, OperationError>(())
        })
    }

    fn inbox(messages: &[&str]) -> mpsc::Receiver<InboundMessage> {
        let (tx, rx) = mpsc::channel(messages.len().max(1));
        for message in messages {
            tx.try_send(InboundMessage::Text((*message).to_string())).unwrap();
        }
        rx
    }

    async fn run(ctx: SessionContext, sink: &RecordingSink, messages: &[&str]) -> MessageCounter {
        let registry = ConnectionRegistry::new();
        let handle = registry.register("/stream");
        run_session(ctx, SocketWriter::new(sink.clone()), inbox(messages), handle).await
    }

    #[tokio::test]
    async fn streamed_tokens_then_normal_close() {
        let sink = RecordingSink::default();
        let counter = run(context(words(), true), &sink, &["to be"]).await;

        assert_eq!(
            sink.texts(),
            vec![
                json!({"isError": false, "data": "to"}),
                json!({"isError": false, "data": "be"}),
            ]
        );
        assert_eq!(sink.closes(), vec![(1000, "request served".to_string())]);
        assert_eq!(counter.get(), 1);
    }

    #[tokio::test]
    async fn final_value_is_sent_when_nothing_streamed() {
        let op = Operation::message(|_graph, _payload, _sink| async {
            Ok::<_, OperationError>(json!({"done": true}))
        });
        let sink = RecordingSink::default();
        run(context(op, true), &sink, &["go"]).await;

        assert_eq!(sink.texts(), vec![json!({"isError": false, "data": {"done": true}})]);
        assert_eq!(sink.closes().len(), 1);
    }

    #[tokio::test]
    async fn handler_failure_sends_one_error_then_closes() {
        let op = Operation::message(|_graph, _payload, _sink| async {
            Err::<(), _>(OperationError::tagged(ErrorCode::UnableToCreateStream, "model offline"))
        });
        let sink = RecordingSink::default();
        let counter = run(context(op, true), &sink, &["go"]).await;

        assert_eq!(
            sink.texts(),
            vec![json!({
                "isError": true,
                "error": {"message": "model offline", "code": "UNABLE_TO_CREATE_STREAM"}
            })]
        );
        assert_eq!(sink.closes(), vec![(1000, "request served".to_string())]);
        assert_eq!(counter.get(), 0);
    }

    #[tokio::test]
    async fn close_follows_even_when_error_frame_fails() {
        let op = Operation::message(|_graph, _payload, _sink| async {
            Err::<(), _>(OperationError::tagged(ErrorCode::Unidentified, "nope"))
        });
        let sink = RecordingSink {
            fail_after: Some(0),
            ..RecordingSink::default()
        };
        run(context(op, true), &sink, &["go"]).await;

        assert!(sink.texts().is_empty());
        assert_eq!(sink.closes(), vec![(1000, "request served".to_string())]);
    }

    #[tokio::test]
    async fn panicking_handler_is_reported_and_closed() {
        let op = Operation::message(|_graph, _payload, _sink| async {
            if true {
                panic!("bad frame");
            }
            Ok::<(), OperationError>(())
        });
        let sink = RecordingSink::default();
        run(context(op, true), &sink, &["go"]).await;

        let texts = sink.texts();
        assert_eq!(texts.len(), 1);
        assert_eq!(texts[0]["error"]["code"], "UNIDENTIFIED");
        assert_eq!(sink.closes().len(), 1);
    }

    #[tokio::test]
    async fn one_shot_ignores_queued_messages() {
        let sink = RecordingSink::default();
        let counter = run(context(words(), true), &sink, &["first", "second"]).await;

        assert_eq!(sink.texts(), vec![json!({"isError": false, "data": "first"})]);
        assert_eq!(counter.get(), 1);
    }

    #[tokio::test]
    async fn multi_message_sessions_see_prior_quantity() {
        let op = Operation::message(|_graph, payload: Payload<InboundMessage>, _sink| async move {
            Ok::<_, OperationError>(payload.message_quantity)
        });
        let sink = RecordingSink::default();
        let counter = run(context(op, false), &sink, &["a", "b", "c"]).await;

        assert_eq!(
            sink.texts(),
            vec![
                json!({"isError": false, "data": 0}),
                json!({"isError": false, "data": 1}),
                json!({"isError": false, "data": 2}),
            ]
        );
        assert_eq!(counter.get(), 3);
        assert_eq!(sink.closes(), vec![(1000, "request served".to_string())]);
    }

    #[tokio::test]
    async fn draining_connection_closes_with_going_away() {
        let registry = ConnectionRegistry::new();
        let handle = registry.register("/stream");
        registry.drain_all();

        let sink = RecordingSink::default();
        let counter = run_session(
            context(words(), true),
            SocketWriter::new(sink.clone()),
            inbox(&["never handled"]),
            handle,
        )
        .await;

        assert!(sink.texts().is_empty());
        assert_eq!(sink.closes(), vec![(1001, "server shutting down".to_string())]);
        assert_eq!(counter.get(), 0);
    }

    #[tokio::test]
    async fn token_failure_during_drain_closes_going_away() {
        let registry = Arc::new(ConnectionRegistry::new());
        let handle = registry.register("/stream");
        let draining = Arc::clone(&registry);

        let op = Operation::message(move |_graph, _payload: Payload<InboundMessage>, sink: SinkCallback| {
            let draining = Arc::clone(&draining);
            async move {
                draining.drain_all();
                sink.send(&StreamToken::new("lost")).await?;
                Ok::<_, OperationError>(())
            }
        });
        let sink = RecordingSink {
            fail_after: Some(0),
            ..RecordingSink::default()
        };
        run_session(context(op, true), SocketWriter::new(sink.clone()), inbox(&["go"]), handle).await;

        assert!(sink.texts().is_empty());
        assert_eq!(sink.closes(), vec![(1001, "server shutting down".to_string())]);
    }

    #[tokio::test]
    async fn handler_sees_connection_cancellation() {
        let registry = ConnectionRegistry::new();
        let handle = registry.register("/stream");
        let disconnect = Arc::clone(&handle);

        let op = Operation::message(move |_graph, payload: Payload<InboundMessage>, _sink| {
            let disconnect = Arc::clone(&disconnect);
            async move {
                disconnect.disconnect();
                payload.cancellation.cancelled().await;
                Err::<(), _>(OperationError::Stream(docintake_core::StreamError::Cancelled))
            }
        });

        let sink = RecordingSink::default();
        run_session(context(op, true), SocketWriter::new(sink.clone()), inbox(&["go"]), handle).await;

        assert_eq!(sink.texts()[0]["error"]["code"], "UNABLE_TO_CONSUME_STREAM");
        assert_eq!(sink.closes().len(), 1);
    }
}
