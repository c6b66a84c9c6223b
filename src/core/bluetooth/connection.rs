//! GATT session lifecycle
//!
//! [`ConnectionStateMachine`] is a pure state machine: caller operations and
//! backend events go in, [`GattRequest`]s for the driver come out. It never
//! touches the platform itself.

use log::{debug, info, warn};
use uuid::Uuid;

use crate::core::bluetooth::constants::UUID_CCCD;
use crate::core::bluetooth::error::{BleError, GattFailure, GattResource, SessionError};
use crate::core::bluetooth::types::{ConnectionState, GattProfile, SessionId};

/// The service and characteristic a session subscribes to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GattTarget {
    pub service: Uuid,
    pub characteristic: Uuid,
}

/// Work the driver must carry out on the backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GattRequest {
    Connect {
        session: SessionId,
        address: String,
    },
    DiscoverServices {
        session: SessionId,
        address: String,
    },
    EnableNotifications {
        session: SessionId,
        address: String,
        service: Uuid,
        characteristic: Uuid,
    },
    /// Close the handle of a session that is no longer live
    Release {
        session: SessionId,
        address: String,
    },
}

/// Backend completions, each stamped with the session it belongs to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GattEvent {
    LinkUp {
        session: SessionId,
        result: Result<(), GattFailure>,
    },
    ServicesDiscovered {
        session: SessionId,
        result: Result<GattProfile, GattFailure>,
    },
    NotificationsEnabled {
        session: SessionId,
        result: Result<(), GattFailure>,
    },
    LinkDown {
        session: SessionId,
        reason: Option<GattFailure>,
    },
    ConnectTimedOut {
        session: SessionId,
    },
}

impl GattEvent {
    pub fn session(&self) -> SessionId {
        match self {
            GattEvent::LinkUp { session, .. }
            | GattEvent::ServicesDiscovered { session, .. }
            | GattEvent::NotificationsEnabled { session, .. }
            | GattEvent::LinkDown { session, .. }
            | GattEvent::ConnectTimedOut { session } => *session,
        }
    }
}

/// The single live session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSession {
    pub id: SessionId,
    pub target_address: String,
    pub service: Option<Uuid>,
    pub notify_characteristic: Option<Uuid>,
    pub notifying: bool,
}

/// Outcome of feeding one event to the machine
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Transition {
    pub requests: Vec<GattRequest>,
    /// The observable state changed
    pub state_changed: bool,
    /// The link dropped cleanly while a session was live
    pub link_lost: bool,
}

pub struct ConnectionStateMachine {
    target: GattTarget,
    state: ConnectionState,
    session: Option<ConnectionSession>,
    next_session: u64,
}

impl ConnectionStateMachine {
    pub fn new(target: GattTarget) -> Self {
        Self {
            target,
            state: ConnectionState::Idle,
            session: None,
            next_session: 0,
        }
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    pub fn session(&self) -> Option<&ConnectionSession> {
        self.session.as_ref()
    }

    pub fn target(&self) -> GattTarget {
        self.target
    }

    /// True if `session` is the live session
    pub fn is_current(&self, session: SessionId) -> bool {
        self.session.as_ref().is_some_and(|s| s.id == session)
    }

    /// True if notifications from `session` should be processed
    pub fn accepts_notifications(&self, session: SessionId) -> bool {
        self.session
            .as_ref()
            .is_some_and(|s| s.id == session && s.notifying)
    }

    /// Starts a new session, releasing any prior handle first.
    ///
    /// The returned requests are "request accepted" only; completion arrives
    /// later as [`GattEvent::LinkUp`].
    pub fn connect(&mut self, address: &str) -> Result<Vec<GattRequest>, BleError> {
        if let ConnectionState::Error(error) = &self.state {
            return Err(BleError::InvalidState(format!(
                "session is in error ({}); reset before connecting",
                error
            )));
        }

        let mut requests = self.release();
        self.next_session += 1;
        let id = SessionId(self.next_session);
        self.session = Some(ConnectionSession {
            id,
            target_address: address.to_string(),
            service: None,
            notify_characteristic: None,
            notifying: false,
        });
        self.state = ConnectionState::Connecting(address.to_string());
        info!("Session {}: connecting to {}", id, address);

        requests.push(GattRequest::Connect {
            session: id,
            address: address.to_string(),
        });
        Ok(requests)
    }

    /// Releases the live session immediately. No-op without a session.
    pub fn disconnect(&mut self) -> Vec<GattRequest> {
        let Some(address) = self.session.as_ref().map(|s| s.target_address.clone()) else {
            debug!("Disconnect requested with no live session.");
            return Vec::new();
        };
        info!("Disconnecting from {}", address);
        self.teardown(ConnectionState::Disconnected(address))
    }

    /// Leaves the error state. Returns `false` in any other state.
    pub fn reset(&mut self) -> bool {
        if matches!(self.state, ConnectionState::Error(_)) {
            self.state = ConnectionState::Idle;
            true
        } else {
            false
        }
    }

    /// Reflects a running scan in the observable state.
    pub fn scan_started(&mut self) -> bool {
        if self.session.is_none()
            && matches!(
                self.state,
                ConnectionState::Idle | ConnectionState::Disconnected(_)
            )
        {
            self.state = ConnectionState::Scanning;
            return true;
        }
        false
    }

    pub fn scan_stopped(&mut self) -> bool {
        if self.state == ConnectionState::Scanning {
            self.state = ConnectionState::Idle;
            return true;
        }
        false
    }

    /// Applies a backend event. Events for any session but the live one are ignored.
    pub fn handle(&mut self, event: GattEvent) -> Transition {
        let session = event.session();
        if !self.is_current(session) {
            warn!("Ignoring late event for session {}: {:?}", session, event);
            return Transition::default();
        }

        match event {
            GattEvent::LinkUp { result, .. } => self.on_link_up(result),
            GattEvent::ServicesDiscovered { result, .. } => self.on_services_discovered(result),
            GattEvent::NotificationsEnabled { result, .. } => self.on_notifications_enabled(result),
            GattEvent::LinkDown { reason, .. } => self.on_link_down(reason),
            GattEvent::ConnectTimedOut { .. } => self.on_connect_timeout(),
        }
    }

    fn on_link_up(&mut self, result: Result<(), GattFailure>) -> Transition {
        let ConnectionState::Connecting(address) = &self.state else {
            debug!("Link up outside of connecting state, ignoring.");
            return Transition::default();
        };
        let address = address.clone();

        if let Err(failure) = result {
            return self.fail(failure.into());
        }

        info!("Device {} connected. Discovering services...", address);
        let session = self.live_id();
        self.state = ConnectionState::Connected(address.clone());
        Transition {
            requests: vec![GattRequest::DiscoverServices { session, address }],
            state_changed: true,
            link_lost: false,
        }
    }

    fn on_services_discovered(&mut self, result: Result<GattProfile, GattFailure>) -> Transition {
        let ConnectionState::Connected(address) = &self.state else {
            debug!("Services discovered outside of connected state, ignoring.");
            return Transition::default();
        };
        let address = address.clone();

        let profile = match result {
            Ok(profile) => profile,
            Err(failure) => return self.fail(failure.into()),
        };
        let GattTarget {
            service,
            characteristic,
        } = self.target;

        let Some(found_service) = profile.service(service) else {
            for s in &profile.services {
                debug!("Available service: {}", s.uuid);
            }
            return self.fail(SessionError::Resolution(GattResource::Service(service)));
        };
        let Some(found_characteristic) = found_service.characteristic(characteristic) else {
            return self.fail(SessionError::Resolution(GattResource::Characteristic(
                characteristic,
            )));
        };
        if !found_characteristic.descriptors.contains(&UUID_CCCD) {
            return self.fail(SessionError::Resolution(GattResource::Descriptor(UUID_CCCD)));
        }

        info!("Found service {} and characteristic {}. Enabling notifications.", service, characteristic);
        let session = match self.session.as_mut() {
            Some(live) => {
                live.service = Some(service);
                live.notify_characteristic = Some(characteristic);
                live.id
            }
            None => return Transition::default(),
        };
        Transition {
            requests: vec![GattRequest::EnableNotifications {
                session,
                address,
                service,
                characteristic,
            }],
            state_changed: false,
            link_lost: false,
        }
    }

    fn on_notifications_enabled(&mut self, result: Result<(), GattFailure>) -> Transition {
        if let Err(failure) = result {
            return self.fail(failure.into());
        }
        if let Some(live) = self.session.as_mut() {
            live.notifying = true;
            info!("Notifications enabled for session {}.", live.id);
        }
        Transition::default()
    }

    fn on_link_down(&mut self, reason: Option<GattFailure>) -> Transition {
        match reason {
            Some(failure) => {
                warn!("Link lost with failure: {}", failure);
                self.fail(failure.into())
            }
            None => {
                let address = self.live_address();
                warn!("Device {} disconnected.", address);
                Transition {
                    requests: self.teardown(ConnectionState::Disconnected(address)),
                    state_changed: true,
                    link_lost: true,
                }
            }
        }
    }

    fn on_connect_timeout(&mut self) -> Transition {
        if !matches!(self.state, ConnectionState::Connecting(_)) {
            return Transition::default();
        }
        self.fail(SessionError::Connection(
            "connection attempt timed out".to_string(),
        ))
    }

    /// Any failure is fatal to the session: release the handle, enter `Error`.
    fn fail(&mut self, error: SessionError) -> Transition {
        warn!("Session failed: {}", error);
        Transition {
            requests: self.teardown(ConnectionState::Error(error)),
            state_changed: true,
            link_lost: false,
        }
    }

    fn teardown(&mut self, next: ConnectionState) -> Vec<GattRequest> {
        let requests = self.release();
        self.state = next;
        requests
    }

    fn release(&mut self) -> Vec<GattRequest> {
        self.session
            .take()
            .map(|s| GattRequest::Release {
                session: s.id,
                address: s.target_address,
            })
            .into_iter()
            .collect()
    }

    fn live_id(&self) -> SessionId {
        self.session.as_ref().map(|s| s.id).unwrap_or(SessionId(0))
    }

    fn live_address(&self) -> String {
        self.session
            .as_ref()
            .map(|s| s.target_address.clone())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::bluetooth::types::{CharacteristicInfo, ServiceInfo};

    const SERVICE: Uuid = Uuid::from_u128(0x10);
    const CHARACTERISTIC: Uuid = Uuid::from_u128(0x11);

    fn machine() -> ConnectionStateMachine {
        ConnectionStateMachine::new(GattTarget {
            service: SERVICE,
            characteristic: CHARACTERISTIC,
        })
    }

    fn profile(descriptors: Vec<Uuid>) -> GattProfile {
        GattProfile {
            services: vec![ServiceInfo {
                uuid: SERVICE,
                characteristics: vec![CharacteristicInfo {
                    uuid: CHARACTERISTIC,
                    descriptors,
                }],
            }],
        }
    }

    fn session_of(requests: &[GattRequest]) -> SessionId {
        requests
            .iter()
            .find_map(|r| match r {
                GattRequest::Connect { session, .. } => Some(*session),
                _ => None,
            })
            .unwrap()
    }

    fn connected(machine: &mut ConnectionStateMachine, address: &str) -> SessionId {
        let session = session_of(&machine.connect(address).unwrap());
        machine.handle(GattEvent::LinkUp { session, result: Ok(()) });
        session
    }

    #[test]
    fn happy_path_reaches_notifying_session() {
        let mut m = machine();
        let requests = m.connect("A").unwrap();
        let session = session_of(&requests);
        assert_eq!(m.state(), &ConnectionState::Connecting("A".into()));

        let t = m.handle(GattEvent::LinkUp { session, result: Ok(()) });
        assert_eq!(m.state(), &ConnectionState::Connected("A".into()));
        assert_eq!(
            t.requests,
            vec![GattRequest::DiscoverServices { session, address: "A".into() }]
        );

        let t = m.handle(GattEvent::ServicesDiscovered {
            session,
            result: Ok(profile(vec![UUID_CCCD])),
        });
        assert_eq!(
            t.requests,
            vec![GattRequest::EnableNotifications {
                session,
                address: "A".into(),
                service: SERVICE,
                characteristic: CHARACTERISTIC,
            }]
        );
        assert!(!m.accepts_notifications(session));

        m.handle(GattEvent::NotificationsEnabled { session, result: Ok(()) });
        assert!(m.accepts_notifications(session));
        assert_eq!(m.state(), &ConnectionState::Connected("A".into()));
    }

    #[test]
    fn connecting_elsewhere_releases_the_previous_handle_first() {
        let mut m = machine();
        let first = connected(&mut m, "A");

        let requests = m.connect("B").unwrap();
        assert_eq!(requests.len(), 2);
        assert_eq!(
            requests[0],
            GattRequest::Release { session: first, address: "A".into() }
        );
        assert!(matches!(&requests[1], GattRequest::Connect { address, .. } if address == "B"));
        assert!(!m.is_current(first));
        assert_eq!(m.state(), &ConnectionState::Connecting("B".into()));
    }

    #[test]
    fn late_callback_after_disconnect_is_ignored() {
        let mut m = machine();
        let session = connected(&mut m, "A");

        let requests = m.disconnect();
        assert_eq!(requests, vec![GattRequest::Release { session, address: "A".into() }]);
        assert_eq!(m.state(), &ConnectionState::Disconnected("A".into()));

        let t = m.handle(GattEvent::ServicesDiscovered {
            session,
            result: Ok(profile(vec![UUID_CCCD])),
        });
        assert_eq!(t, Transition::default());
        assert_eq!(m.state(), &ConnectionState::Disconnected("A".into()));
        assert!(m.session().is_none());
    }

    #[test]
    fn late_callback_from_replaced_session_is_ignored() {
        let mut m = machine();
        let old = session_of(&m.connect("A").unwrap());
        let new = session_of(&m.connect("B").unwrap());

        m.handle(GattEvent::LinkUp { session: old, result: Ok(()) });
        assert_eq!(m.state(), &ConnectionState::Connecting("B".into()));

        m.handle(GattEvent::LinkUp { session: new, result: Ok(()) });
        assert_eq!(m.state(), &ConnectionState::Connected("B".into()));
    }

    #[test]
    fn missing_attributes_are_resolution_errors() {
        let cases = [
            (GattProfile::default(), GattResource::Service(SERVICE)),
            (
                GattProfile {
                    services: vec![ServiceInfo { uuid: SERVICE, characteristics: vec![] }],
                },
                GattResource::Characteristic(CHARACTERISTIC),
            ),
            (profile(vec![]), GattResource::Descriptor(UUID_CCCD)),
        ];

        for (profile, resource) in cases {
            let mut m = machine();
            let session = connected(&mut m, "A");
            let t = m.handle(GattEvent::ServicesDiscovered { session, result: Ok(profile) });

            assert_eq!(
                m.state(),
                &ConnectionState::Error(SessionError::Resolution(resource))
            );
            assert_eq!(t.requests, vec![GattRequest::Release { session, address: "A".into() }]);
            assert!(m.session().is_none());
        }
    }

    #[test]
    fn resolution_error_message_names_the_resource() {
        let error = SessionError::Resolution(GattResource::Service(SERVICE));
        assert_eq!(error.to_string(), format!("service {} not found", SERVICE));
    }

    #[test]
    fn failure_status_is_fatal_and_permission_is_distinct() {
        let mut m = machine();
        let session = session_of(&m.connect("A").unwrap());
        let t = m.handle(GattEvent::LinkUp {
            session,
            result: Err(GattFailure::PermissionDenied("BLUETOOTH_CONNECT".into())),
        });

        assert!(matches!(m.state(), ConnectionState::Error(SessionError::Permission(_))));
        assert_eq!(t.requests.len(), 1);

        let mut m = machine();
        let session = connected(&mut m, "A");
        m.handle(GattEvent::NotificationsEnabled {
            session,
            result: Err(GattFailure::Status("cccd write rejected".into())),
        });
        assert!(matches!(m.state(), ConnectionState::Error(SessionError::Connection(_))));
    }

    #[test]
    fn error_is_absorbing_until_reset() {
        let mut m = machine();
        let session = session_of(&m.connect("A").unwrap());
        m.handle(GattEvent::ConnectTimedOut { session });
        assert!(matches!(m.state(), ConnectionState::Error(_)));

        assert!(matches!(m.connect("A"), Err(BleError::InvalidState(_))));
        assert!(!m.scan_started());

        assert!(m.reset());
        assert_eq!(m.state(), &ConnectionState::Idle);
        assert!(!m.reset());
        assert!(m.connect("A").is_ok());
    }

    #[test]
    fn connect_timeout_only_applies_while_connecting() {
        let mut m = machine();
        let session = connected(&mut m, "A");
        let t = m.handle(GattEvent::ConnectTimedOut { session });
        assert_eq!(t, Transition::default());
        assert_eq!(m.state(), &ConnectionState::Connected("A".into()));
    }

    #[test]
    fn clean_link_down_reports_disconnected() {
        let mut m = machine();
        let session = connected(&mut m, "A");
        let t = m.handle(GattEvent::LinkDown { session, reason: None });

        assert!(t.link_lost);
        assert_eq!(m.state(), &ConnectionState::Disconnected("A".into()));
        assert_eq!(t.requests, vec![GattRequest::Release { session, address: "A".into() }]);

        let t = m.handle(GattEvent::LinkDown { session, reason: None });
        assert_eq!(t, Transition::default());
    }

    #[test]
    fn scanning_state_follows_scan_without_session() {
        let mut m = machine();
        assert!(m.scan_started());
        assert_eq!(m.state(), &ConnectionState::Scanning);
        assert!(m.scan_stopped());
        assert_eq!(m.state(), &ConnectionState::Idle);

        connected(&mut m, "A");
        assert!(!m.scan_started());
        assert!(!m.scan_stopped());
    }

    #[test]
    fn disconnect_without_session_is_noop() {
        let mut m = machine();
        assert!(m.disconnect().is_empty());
        assert_eq!(m.state(), &ConnectionState::Idle);
    }
}
