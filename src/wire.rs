//! Newline-delimited JSON protocol.
//!
//! Each request is one line tagged by `"op"`; each gets exactly one reply
//! line, `{"ok":true,"data":..}` or `{"ok":false,"error":{"code","message"}}`.
//! After `subscribe`, committed events for that business arrive as
//! `{"event":..}` lines interleaved with replies.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::NaiveDate;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};
use tracing::{debug, warn};
use ulid::Ulid;

use crate::engine::{Engine, EngineError};
use crate::limits::MAX_LINE_LEN;
use crate::model::*;
use crate::observability::{request_label, REQUESTS_TOTAL, REQUEST_DURATION_SECONDS};
use crate::time::hhmm;

const EVENT_BUFFER: usize = 256;

#[derive(Debug, Error)]
pub enum WireError {
    #[error(transparent)]
    Codec(#[from] LinesCodecError),
    #[error("encoding reply: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum Request {
    AvailableSlots {
        service_id: Ulid,
        #[serde(default)]
        staff_id: Option<Ulid>,
        date: NaiveDate,
    },
    BusinessAvailability {
        business_id: Ulid,
        date: NaiveDate,
    },
    CreateAppointment(NewAppointment),
    Approve {
        id: Ulid,
    },
    Start {
        id: Ulid,
    },
    Complete {
        id: Ulid,
    },
    Cancel {
        id: Ulid,
        #[serde(default)]
        reason: Option<String>,
    },
    NoShow {
        id: Ulid,
    },
    RequestReschedule {
        id: Ulid,
        date: NaiveDate,
        #[serde(with = "hhmm")]
        start: Minutes,
        #[serde(default)]
        reason: Option<String>,
    },
    ApproveReschedule {
        id: Ulid,
    },
    RejectReschedule {
        id: Ulid,
    },
    GetAppointment {
        id: Ulid,
    },
    ListAppointments {
        business_id: Ulid,
        date: NaiveDate,
    },
    Subscribe {
        business_id: Ulid,
    },
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum Data {
    Slots(AvailableSlots),
    Availability(BusinessAvailability),
    Appointment(Appointment),
    Appointments(Vec<Appointment>),
    Subscribed {
        subscribed: Ulid,
    },
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum Response {
    Ok { ok: bool, data: Data },
    Error { ok: bool, error: ErrorBody },
    Event { event: Event },
}

impl Response {
    pub fn ok(data: Data) -> Self {
        Response::Ok { ok: true, data }
    }

    pub fn error(code: &'static str, message: impl Into<String>) -> Self {
        Response::Error {
            ok: false,
            error: ErrorBody {
                code,
                message: message.into(),
            },
        }
    }
}

impl From<EngineError> for Response {
    fn from(e: EngineError) -> Self {
        Response::error(e.code(), e.to_string())
    }
}

/// Per-connection state: the engine plus one forwarding task per
/// subscribed business, all feeding `events`.
struct Session {
    engine: Arc<Engine>,
    events: mpsc::Sender<Event>,
    forwarders: HashMap<Ulid, JoinHandle<()>>,
}

impl Drop for Session {
    fn drop(&mut self) {
        for handle in self.forwarders.values() {
            handle.abort();
        }
    }
}

impl Session {
    fn subscribe(&mut self, business_id: Ulid) {
        if self.forwarders.contains_key(&business_id) {
            return;
        }
        let mut rx = self.engine.notify.subscribe(business_id);
        let tx = self.events.clone();
        let handle = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        if tx.send(event).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(%business_id, "subscriber lagged, {n} events dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        self.forwarders.insert(business_id, handle);
    }

    async fn dispatch(&mut self, request: Request) -> Result<Data, EngineError> {
        let engine = self.engine.clone();
        let data = match request {
            Request::AvailableSlots {
                service_id,
                staff_id,
                date,
            } => Data::Slots(engine.get_available_slots(service_id, staff_id, date).await?),
            Request::BusinessAvailability { business_id, date } => {
                Data::Availability(engine.get_business_availability(business_id, date).await?)
            }
            Request::CreateAppointment(new) => {
                Data::Appointment(engine.create_appointment(new).await?)
            }
            Request::Approve { id } => Data::Appointment(engine.approve(id).await?),
            Request::Start { id } => Data::Appointment(engine.start(id).await?),
            Request::Complete { id } => Data::Appointment(engine.complete(id).await?),
            Request::Cancel { id, reason } => Data::Appointment(engine.cancel(id, reason).await?),
            Request::NoShow { id } => Data::Appointment(engine.mark_no_show(id).await?),
            Request::RequestReschedule {
                id,
                date,
                start,
                reason,
            } => Data::Appointment(engine.request_reschedule(id, date, start, reason).await?),
            Request::ApproveReschedule { id } => {
                Data::Appointment(engine.approve_reschedule(id).await?)
            }
            Request::RejectReschedule { id } => {
                Data::Appointment(engine.reject_reschedule(id).await?)
            }
            Request::GetAppointment { id } => Data::Appointment(engine.get_appointment(id).await?),
            Request::ListAppointments { business_id, date } => {
                Data::Appointments(engine.list_appointments(business_id, date).await?)
            }
            Request::Subscribe { business_id } => {
                self.subscribe(business_id);
                Data::Subscribed {
                    subscribed: business_id,
                }
            }
        };
        Ok(data)
    }

    async fn handle_line(&mut self, line: &str) -> Response {
        let request: Request = match serde_json::from_str(line) {
            Ok(r) => r,
            Err(e) => {
                metrics::counter!(REQUESTS_TOTAL, "op" => "unknown", "status" => "malformed")
                    .increment(1);
                return Response::error("MALFORMED_REQUEST", e.to_string());
            }
        };

        let op = request_label(&request);
        let started = Instant::now();
        let result = self.dispatch(request).await;
        metrics::histogram!(REQUEST_DURATION_SECONDS, "op" => op)
            .record(started.elapsed().as_secs_f64());
        match result {
            Ok(data) => {
                metrics::counter!(REQUESTS_TOTAL, "op" => op, "status" => "ok").increment(1);
                Response::ok(data)
            }
            Err(e) => {
                metrics::counter!(REQUESTS_TOTAL, "op" => op, "status" => "error").increment(1);
                debug!(op, code = e.code(), "request failed: {e}");
                e.into()
            }
        }
    }
}

async fn send(
    framed: &mut Framed<TcpStream, LinesCodec>,
    response: &Response,
) -> Result<(), WireError> {
    framed.send(serde_json::to_string(response)?).await?;
    Ok(())
}

/// Serve one client until it disconnects.
pub async fn process_connection(socket: TcpStream, engine: Arc<Engine>) -> Result<(), WireError> {
    let mut framed = Framed::new(socket, LinesCodec::new_with_max_length(MAX_LINE_LEN));
    let (events_tx, mut events_rx) = mpsc::channel(EVENT_BUFFER);
    let mut session = Session {
        engine,
        events: events_tx,
        forwarders: HashMap::new(),
    };

    loop {
        tokio::select! {
            line = framed.next() => {
                let response = match line {
                    None => break,
                    Some(Ok(line)) if line.trim().is_empty() => continue,
                    Some(Ok(line)) => session.handle_line(&line).await,
                    Some(Err(LinesCodecError::MaxLineLengthExceeded)) => Response::error(
                        "MALFORMED_REQUEST",
                        format!("line longer than {MAX_LINE_LEN} bytes"),
                    ),
                    Some(Err(e)) => return Err(e.into()),
                };
                send(&mut framed, &response).await?;
            }
            Some(event) = events_rx.recv() => {
                send(&mut framed, &Response::Event { event }).await?;
            }
        }
    }
    Ok(())
}
