// =============================================================================
// Broker transport contract — the wire-format shim seam
// =============================================================================
//
// The actual brokerage SDK binding lives outside this crate. Whatever the
// binding is, it must expose the synchronous request surface below (each
// call returns 0 when the request was accepted for sending) and push its
// asynchronous callbacks through the registered listener as
// `TransportEvent`s, on the SDK's own delivery thread.
// =============================================================================

use std::sync::Arc;

use crate::types::{
    AccountSnapshot, Direction, InstrumentInfo, Offset, Order, PositionRecord, Tick, TradeFill,
};

// ---------------------------------------------------------------------------
// Disconnect reasons
// ---------------------------------------------------------------------------

pub const REASON_READ_FAILURE: i32 = 0x1001;
pub const REASON_WRITE_FAILURE: i32 = 0x1002;
pub const REASON_HEARTBEAT_TIMEOUT: i32 = 0x2001;
pub const REASON_HEARTBEAT_SEND_FAILURE: i32 = 0x2002;
pub const REASON_BAD_PACKET: i32 = 0x2003;

/// Decoded front-disconnect reason code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    ReadFailure,
    WriteFailure,
    HeartbeatTimeout,
    HeartbeatSendFailure,
    BadPacket,
    Unknown(i32),
}

impl DisconnectReason {
    pub fn from_code(code: i32) -> Self {
        match code {
            REASON_READ_FAILURE => Self::ReadFailure,
            REASON_WRITE_FAILURE => Self::WriteFailure,
            REASON_HEARTBEAT_TIMEOUT => Self::HeartbeatTimeout,
            REASON_HEARTBEAT_SEND_FAILURE => Self::HeartbeatSendFailure,
            REASON_BAD_PACKET => Self::BadPacket,
            other => Self::Unknown(other),
        }
    }
}

impl std::fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ReadFailure => write!(f, "network read failure"),
            Self::WriteFailure => write!(f, "network write failure"),
            Self::HeartbeatTimeout => write!(f, "heartbeat receive timeout"),
            Self::HeartbeatSendFailure => write!(f, "heartbeat send failure"),
            Self::BadPacket => write!(f, "malformed packet received"),
            Self::Unknown(code) => write!(f, "unknown reason ({code:#x})"),
        }
    }
}

// ---------------------------------------------------------------------------
// Request payloads
// ---------------------------------------------------------------------------

/// Order insert request with the engine's fixed execution parameters:
/// limit price, good-for-day, any-volume, immediate activation,
/// speculative hedge.
#[derive(Debug, Clone)]
pub struct OrderRequest {
    pub instrument_id: String,
    pub order_ref: String,
    pub direction: Direction,
    pub offset: Offset,
    pub price: f64,
    pub volume: i64,
}

/// Order action (cancel) request.
#[derive(Debug, Clone)]
pub struct CancelRequest {
    pub instrument_id: String,
    pub order_ref: String,
    pub exchange_id: String,
    pub order_sys_id: String,
    pub front_id: i32,
    pub session_id: i32,
}

// ---------------------------------------------------------------------------
// Asynchronous events
// ---------------------------------------------------------------------------

/// Callbacks delivered by the transport on its own thread.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    FrontConnected,
    FrontDisconnected {
        reason: i32,
    },
    HeartbeatWarning {
        lapse_secs: i32,
    },
    AuthResponse {
        error_id: i32,
        error_msg: String,
    },
    LoginResponse {
        error_id: i32,
        error_msg: String,
        front_id: i32,
        session_id: i32,
        trading_day: String,
        max_order_ref: i64,
    },
    SettlementConfirmed,
    InstrumentData {
        instrument: InstrumentInfo,
        is_last: bool,
    },
    AccountData {
        account: AccountSnapshot,
    },
    PositionData {
        position: PositionRecord,
        is_last: bool,
    },
    OrderUpdate {
        order: Order,
    },
    TradeUpdate {
        fill: TradeFill,
    },
    TickData {
        tick: Tick,
    },
    OrderInsertError {
        order_ref: String,
        error_id: i32,
        error_msg: String,
    },
    OrderActionError {
        order_ref: String,
        error_id: i32,
        error_msg: String,
    },
}

/// Receiver for transport callbacks; implemented by the exchange session.
pub trait TransportListener: Send + Sync {
    fn on_event(&self, event: TransportEvent);
}

// ---------------------------------------------------------------------------
// Transport trait
// ---------------------------------------------------------------------------

/// Synchronous request surface of the brokerage connection primitive.
pub trait BrokerTransport: Send + Sync {
    /// Register the callback receiver. Must be called before `init`.
    fn register_listener(&self, listener: Arc<dyn TransportListener>);

    /// Bind to the configured front address.
    fn register_front(&self, address: &str);

    /// Start the connection; completion is signalled via `FrontConnected`.
    fn init(&self) -> i32;

    fn req_authenticate(
        &self,
        broker_id: &str,
        user_id: &str,
        app_id: &str,
        auth_code: &str,
        request_id: i32,
    ) -> i32;

    fn req_user_login(&self, broker_id: &str, user_id: &str, password: &str, request_id: i32)
        -> i32;

    fn req_settlement_confirm(&self, broker_id: &str, investor_id: &str, request_id: i32) -> i32;

    fn req_qry_instruments(&self, request_id: i32) -> i32;

    fn req_qry_account(&self, broker_id: &str, investor_id: &str, request_id: i32) -> i32;

    fn req_qry_positions(&self, broker_id: &str, investor_id: &str, request_id: i32) -> i32;

    fn req_order_insert(&self, order: &OrderRequest, request_id: i32) -> i32;

    fn req_order_action(&self, action: &CancelRequest, request_id: i32) -> i32;

    /// Release the underlying connection; idempotent.
    fn release(&self);
}

// =============================================================================
// In-process simulated broker
// =============================================================================

use parking_lot::{Mutex, RwLock};

/// Minimal in-process broker used for demo runs without a linked brokerage
/// SDK: connects instantly, accepts authentication and login, serves a tiny
/// instrument catalogue, and queues every order it receives.
pub struct SimBroker {
    listener: RwLock<Option<Arc<dyn TransportListener>>>,
    order_counter: Mutex<u64>,
}

impl SimBroker {
    pub fn new() -> Self {
        Self {
            listener: RwLock::new(None),
            order_counter: Mutex::new(0),
        }
    }

    fn emit(&self, event: TransportEvent) {
        if let Some(listener) = self.listener.read().as_ref() {
            listener.on_event(event);
        }
    }

    fn catalogue() -> Vec<InstrumentInfo> {
        vec![
            InstrumentInfo {
                instrument_id: "rb2505".into(),
                exchange_id: "SHFE".into(),
                instrument_name: "rebar 2505".into(),
                volume_multiple: 10,
                price_tick: 1.0,
                max_order_volume: 1000,
                min_order_volume: 1,
            },
            InstrumentInfo {
                instrument_id: "rb2510".into(),
                exchange_id: "SHFE".into(),
                instrument_name: "rebar 2510".into(),
                volume_multiple: 10,
                price_tick: 1.0,
                max_order_volume: 1000,
                min_order_volume: 1,
            },
        ]
    }
}

impl Default for SimBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl BrokerTransport for SimBroker {
    fn register_listener(&self, listener: Arc<dyn TransportListener>) {
        *self.listener.write() = Some(listener);
    }

    fn register_front(&self, _address: &str) {}

    fn init(&self) -> i32 {
        self.emit(TransportEvent::FrontConnected);
        0
    }

    fn req_authenticate(&self, _: &str, _: &str, _: &str, _: &str, _: i32) -> i32 {
        self.emit(TransportEvent::AuthResponse {
            error_id: 0,
            error_msg: String::new(),
        });
        0
    }

    fn req_user_login(&self, _: &str, _: &str, _: &str, _: i32) -> i32 {
        self.emit(TransportEvent::LoginResponse {
            error_id: 0,
            error_msg: String::new(),
            front_id: 1,
            session_id: 1,
            trading_day: chrono::Local::now().format("%Y%m%d").to_string(),
            max_order_ref: 0,
        });
        0
    }

    fn req_settlement_confirm(&self, _: &str, _: &str, _: i32) -> i32 {
        self.emit(TransportEvent::SettlementConfirmed);
        0
    }

    fn req_qry_instruments(&self, _: i32) -> i32 {
        let catalogue = Self::catalogue();
        let last = catalogue.len() - 1;
        for (i, instrument) in catalogue.into_iter().enumerate() {
            self.emit(TransportEvent::InstrumentData {
                instrument,
                is_last: i == last,
            });
        }
        0
    }

    fn req_qry_account(&self, _: &str, _: &str, _: i32) -> i32 {
        self.emit(TransportEvent::AccountData {
            account: AccountSnapshot {
                available: 1_000_000.0,
                balance: 1_000_000.0,
                frozen_margin: 0.0,
                frozen_commission: 0.0,
            },
        });
        0
    }

    fn req_qry_positions(&self, _: &str, _: &str, _: i32) -> i32 {
        // Fresh account: one empty page terminates the query.
        self.emit(TransportEvent::PositionData {
            position: PositionRecord {
                instrument_id: String::new(),
                side: crate::types::PositionSide::Long,
                volume: 0,
                today_volume: 0,
                yesterday_volume: 0,
            },
            is_last: true,
        });
        0
    }

    fn req_order_insert(&self, order: &OrderRequest, _: i32) -> i32 {
        let sys_id = {
            let mut counter = self.order_counter.lock();
            *counter += 1;
            format!("SIM{:08}", *counter)
        };
        self.emit(TransportEvent::OrderUpdate {
            order: Order {
                order_ref: order.order_ref.clone(),
                order_sys_id: sys_id,
                exchange_id: "SIM".into(),
                instrument_id: order.instrument_id.clone(),
                direction: order.direction,
                offset: order.offset,
                price: order.price,
                volume_original: order.volume,
                volume_traded: 0,
                volume_remaining: order.volume,
                status: crate::types::OrderStatus::Queued,
                status_msg: "queued".into(),
            },
        });
        0
    }

    fn req_order_action(&self, action: &CancelRequest, _: i32) -> i32 {
        self.emit(TransportEvent::OrderUpdate {
            order: Order {
                order_ref: action.order_ref.clone(),
                order_sys_id: action.order_sys_id.clone(),
                exchange_id: action.exchange_id.clone(),
                instrument_id: action.instrument_id.clone(),
                direction: Direction::Buy,
                offset: Offset::Open,
                price: 0.0,
                volume_original: 0,
                volume_traded: 0,
                volume_remaining: 0,
                status: crate::types::OrderStatus::Cancelled,
                status_msg: "cancelled".into(),
            },
        });
        0
    }

    fn release(&self) {}
}

// =============================================================================
// Scripted transport for tests
// =============================================================================

#[cfg(test)]
pub mod testing {
    use super::*;
    use crate::types::{OrderStatus, PositionSide};
    use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, Ordering};

    /// Scripted in-process transport. Tests flip the behaviour fields to
    /// exercise failure paths and use `emit` to inject arbitrary callbacks.
    pub struct MockTransport {
        listener: RwLock<Option<Arc<dyn TransportListener>>>,

        // call counters
        pub init_calls: AtomicU32,
        pub auth_calls: AtomicU32,
        pub login_calls: AtomicU32,
        pub insert_calls: AtomicU32,
        pub action_calls: AtomicU32,

        // scripted behaviour
        /// Emit `FrontConnected` when `init` is called.
        pub connect_responds: AtomicBool,
        /// Number of `init` calls to swallow (no callback) before
        /// `connect_responds` applies again.
        pub connect_failures: AtomicU32,
        /// `Some((code, msg))` makes authentication fail.
        pub auth_error: Mutex<Option<(i32, String)>>,
        /// `Some((code, msg))` makes login fail.
        pub login_error: Mutex<Option<(i32, String)>>,
        /// Order-reference seed returned at login.
        pub max_order_ref: AtomicI64,
        /// Ack inserts with a `Queued` order update.
        pub ack_orders: AtomicBool,
        /// Ack actions with a `Cancelled` order update.
        pub ack_cancels: AtomicBool,
        /// Return code for order inserts (non-zero = send rejected).
        pub insert_return: AtomicI64,
    }

    impl MockTransport {
        pub fn new() -> Self {
            Self {
                listener: RwLock::new(None),
                init_calls: AtomicU32::new(0),
                auth_calls: AtomicU32::new(0),
                login_calls: AtomicU32::new(0),
                insert_calls: AtomicU32::new(0),
                action_calls: AtomicU32::new(0),
                connect_responds: AtomicBool::new(true),
                connect_failures: AtomicU32::new(0),
                auth_error: Mutex::new(None),
                login_error: Mutex::new(None),
                max_order_ref: AtomicI64::new(0),
                ack_orders: AtomicBool::new(true),
                ack_cancels: AtomicBool::new(true),
                insert_return: AtomicI64::new(0),
            }
        }

        pub fn emit(&self, event: TransportEvent) {
            if let Some(listener) = self.listener.read().as_ref() {
                listener.on_event(event);
            }
        }
    }

    impl BrokerTransport for MockTransport {
        fn register_listener(&self, listener: Arc<dyn TransportListener>) {
            *self.listener.write() = Some(listener);
        }

        fn register_front(&self, _address: &str) {}

        fn init(&self) -> i32 {
            self.init_calls.fetch_add(1, Ordering::SeqCst);
            if self.connect_failures.load(Ordering::SeqCst) > 0 {
                self.connect_failures.fetch_sub(1, Ordering::SeqCst);
                return 0;
            }
            if self.connect_responds.load(Ordering::SeqCst) {
                self.emit(TransportEvent::FrontConnected);
            }
            0
        }

        fn req_authenticate(&self, _: &str, _: &str, _: &str, _: &str, _: i32) -> i32 {
            self.auth_calls.fetch_add(1, Ordering::SeqCst);
            let (error_id, error_msg) = self
                .auth_error
                .lock()
                .clone()
                .unwrap_or((0, String::new()));
            self.emit(TransportEvent::AuthResponse { error_id, error_msg });
            0
        }

        fn req_user_login(&self, _: &str, _: &str, _: &str, _: i32) -> i32 {
            self.login_calls.fetch_add(1, Ordering::SeqCst);
            let (error_id, error_msg) = self
                .login_error
                .lock()
                .clone()
                .unwrap_or((0, String::new()));
            self.emit(TransportEvent::LoginResponse {
                error_id,
                error_msg,
                front_id: 7,
                session_id: 99,
                trading_day: "20250314".into(),
                max_order_ref: self.max_order_ref.load(Ordering::SeqCst),
            });
            0
        }

        fn req_settlement_confirm(&self, _: &str, _: &str, _: i32) -> i32 {
            self.emit(TransportEvent::SettlementConfirmed);
            0
        }

        fn req_qry_instruments(&self, _: i32) -> i32 {
            self.emit(TransportEvent::InstrumentData {
                instrument: InstrumentInfo {
                    instrument_id: "rb2505".into(),
                    exchange_id: "SHFE".into(),
                    instrument_name: "rebar 2505".into(),
                    volume_multiple: 10,
                    price_tick: 1.0,
                    max_order_volume: 1000,
                    min_order_volume: 1,
                },
                is_last: false,
            });
            self.emit(TransportEvent::InstrumentData {
                instrument: InstrumentInfo {
                    instrument_id: "ag2506".into(),
                    exchange_id: "SHFE".into(),
                    instrument_name: "silver 2506".into(),
                    volume_multiple: 15,
                    price_tick: 1.0,
                    max_order_volume: 500,
                    min_order_volume: 1,
                },
                is_last: true,
            });
            0
        }

        fn req_qry_account(&self, _: &str, _: &str, _: i32) -> i32 {
            self.emit(TransportEvent::AccountData {
                account: AccountSnapshot {
                    available: 500_000.0,
                    balance: 520_000.0,
                    frozen_margin: 0.0,
                    frozen_commission: 0.0,
                },
            });
            0
        }

        fn req_qry_positions(&self, _: &str, _: &str, _: i32) -> i32 {
            self.emit(TransportEvent::PositionData {
                position: PositionRecord {
                    instrument_id: "rb2505".into(),
                    side: PositionSide::Long,
                    volume: 2,
                    today_volume: 2,
                    yesterday_volume: 0,
                },
                is_last: true,
            });
            0
        }

        fn req_order_insert(&self, order: &OrderRequest, _: i32) -> i32 {
            self.insert_calls.fetch_add(1, Ordering::SeqCst);
            let ret = self.insert_return.load(Ordering::SeqCst) as i32;
            if ret != 0 {
                return ret;
            }
            if self.ack_orders.load(Ordering::SeqCst) {
                self.emit(TransportEvent::OrderUpdate {
                    order: Order {
                        order_ref: order.order_ref.clone(),
                        order_sys_id: format!("SYS{}", order.order_ref),
                        exchange_id: "SHFE".into(),
                        instrument_id: order.instrument_id.clone(),
                        direction: order.direction,
                        offset: order.offset,
                        price: order.price,
                        volume_original: order.volume,
                        volume_traded: 0,
                        volume_remaining: order.volume,
                        status: OrderStatus::Queued,
                        status_msg: "queued".into(),
                    },
                });
            }
            0
        }

        fn req_order_action(&self, action: &CancelRequest, _: i32) -> i32 {
            self.action_calls.fetch_add(1, Ordering::SeqCst);
            if self.ack_cancels.load(Ordering::SeqCst) {
                self.emit(TransportEvent::OrderUpdate {
                    order: Order {
                        order_ref: action.order_ref.clone(),
                        order_sys_id: action.order_sys_id.clone(),
                        exchange_id: action.exchange_id.clone(),
                        instrument_id: action.instrument_id.clone(),
                        direction: Direction::Buy,
                        offset: Offset::Open,
                        price: 0.0,
                        volume_original: 0,
                        volume_traded: 0,
                        volume_remaining: 0,
                        status: OrderStatus::Cancelled,
                        status_msg: "cancelled".into(),
                    },
                });
            }
            0
        }

        fn release(&self) {}
    }
}

// =============================================================================
// Tests
// =============================================================================
