//! Endpoint → session registry.

use crate::device::{DeviceDriver, DriverFactory, Endpoint};
use crate::error::{FleetError, Result};
use crate::session::flight::{FlightGuard, SingleFlight};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError};
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// An open, authenticated connection to one terminal.
///
/// Owned by the [`SessionRegistry`]; callers borrow it through an `Arc`
/// and drive it with [`with_driver`](Self::with_driver), which serializes
/// access to the underlying protocol connection.
pub struct Session {
    id: Uuid,
    endpoint: Endpoint,
    opened_at: DateTime<Utc>,
    driver: Mutex<Box<dyn DeviceDriver>>,
}

impl Session {
    fn new(endpoint: Endpoint, driver: Box<dyn DeviceDriver>) -> Self {
        Self {
            id: Uuid::new_v4(),
            endpoint,
            opened_at: Utc::now(),
            driver: Mutex::new(driver),
        }
    }

    /// Unique id of this session instance.
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn opened_at(&self) -> DateTime<Utc> {
        self.opened_at
    }

    /// Run `f` with exclusive access to the driver.
    pub fn with_driver<T>(&self, f: impl FnOnce(&mut dyn DeviceDriver) -> Result<T>) -> Result<T> {
        let mut driver = self
            .driver
            .lock()
            .map_err(|e| FleetError::Task(format!("session {} lock poisoned: {e}", self.endpoint)))?;
        f(driver.as_mut())
    }

    /// Like [`with_driver`](Self::with_driver), but still hands out the
    /// driver after an earlier operation panicked while holding it.
    ///
    /// Reserved for teardown (re-enable, disconnect), which must reach the
    /// terminal even when the download body unwound.
    pub fn with_driver_recovering<T>(&self, f: impl FnOnce(&mut dyn DeviceDriver) -> Result<T>) -> Result<T> {
        let mut driver = self.driver.lock().unwrap_or_else(|poisoned| {
            warn!(endpoint = %self.endpoint, "driver lock poisoned, recovering for teardown");
            PoisonError::into_inner(poisoned)
        });
        f(driver.as_mut())
    }

    /// Ask the driver whether the link still answers.
    ///
    /// Never waits: a driver busy with another operation counts as alive,
    /// so lookups do not stall behind a running download.
    pub fn is_alive(&self) -> bool {
        match self.driver.try_lock() {
            Ok(driver) => driver.is_alive(),
            Err(TryLockError::WouldBlock) => true,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner().is_alive(),
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("endpoint", &self.endpoint)
            .field("opened_at", &self.opened_at)
            .finish_non_exhaustive()
    }
}

/// Holds at most one live [`Session`] per [`Endpoint`].
///
/// The map is guarded by a mutex so background tasks can connect and
/// disconnect concurrently. Network I/O never happens while the lock is
/// held: a connect that loses a race to a concurrent connect for the same
/// endpoint closes its own connection and returns the winner's session.
pub struct SessionRegistry {
    factory: Arc<dyn DriverFactory>,
    sessions: Mutex<HashMap<Endpoint, Arc<Session>>>,
    flights: SingleFlight,
}

impl SessionRegistry {
    pub fn new(factory: Arc<dyn DriverFactory>) -> Self {
        Self {
            factory,
            sessions: Mutex::new(HashMap::new()),
            flights: SingleFlight::new(),
        }
    }

    fn lock_sessions(&self) -> Result<MutexGuard<'_, HashMap<Endpoint, Arc<Session>>>> {
        self.sessions
            .lock()
            .map_err(|e| FleetError::Task(format!("session registry lock poisoned: {e}")))
    }

    /// Open a session, or return the existing one unchanged.
    ///
    /// Blocks for up to `timeout` while the driver connects.
    ///
    /// # Errors
    ///
    /// [`FleetError::Connection`] when the terminal cannot be reached and
    /// [`FleetError::Protocol`] when the handshake is rejected.
    pub fn connect(&self, endpoint: &Endpoint, password: u32, timeout: Duration) -> Result<Arc<Session>> {
        if let Some(existing) = self.lock_sessions()?.get(endpoint) {
            debug!(endpoint = %endpoint, "reusing open session");
            return Ok(Arc::clone(existing));
        }

        let mut driver = self.factory.create(endpoint);
        driver.connect(endpoint, password, timeout)?;
        let session = Arc::new(Session::new(endpoint.clone(), driver));

        let mut sessions = self.lock_sessions()?;
        if let Some(winner) = sessions.get(endpoint) {
            let winner = Arc::clone(winner);
            drop(sessions);
            debug!(endpoint = %endpoint, "lost connect race, closing duplicate connection");
            if let Err(e) = close(&session) {
                debug!(endpoint = %endpoint, "ignoring teardown error: {e}");
            }
            return Ok(winner);
        }
        sessions.insert(endpoint.clone(), Arc::clone(&session));
        info!(endpoint = %endpoint, session = %session.id(), "session opened");
        Ok(session)
    }

    /// Close and remove the session for `endpoint`, if any.
    ///
    /// Transport errors during teardown are logged and swallowed; the entry
    /// is removed regardless. Returns `true` when a session was removed.
    pub fn disconnect(&self, endpoint: &Endpoint) -> bool {
        let removed = match self.sessions.lock() {
            Ok(mut sessions) => sessions.remove(endpoint),
            Err(poisoned) => poisoned.into_inner().remove(endpoint),
        };
        match removed {
            Some(session) => {
                match close(&session) {
                    Ok(()) => info!(endpoint = %endpoint, "session closed"),
                    Err(e) => warn!(endpoint = %endpoint, "session removed, teardown failed: {e}"),
                }
                true
            }
            None => false,
        }
    }

    /// Drop the registry entry without talking to the terminal. Used after
    /// the terminal closed the link itself (restart, power-off).
    pub fn forget(&self, endpoint: &Endpoint) -> bool {
        match self.sessions.lock() {
            Ok(mut sessions) => sessions.remove(endpoint).is_some(),
            Err(poisoned) => poisoned.into_inner().remove(endpoint).is_some(),
        }
    }

    /// Pure lookup; performs no I/O.
    pub fn is_connected(&self, endpoint: &Endpoint) -> bool {
        self.sessions
            .lock()
            .map(|sessions| sessions.contains_key(endpoint))
            .unwrap_or(false)
    }

    /// Fetch the live session for `endpoint`.
    ///
    /// A registered session whose link no longer answers is evicted.
    ///
    /// # Errors
    ///
    /// [`FleetError::NotConnected`] when there is no live session.
    pub fn session(&self, endpoint: &Endpoint) -> Result<Arc<Session>> {
        let session = self
            .lock_sessions()?
            .get(endpoint)
            .cloned()
            .ok_or_else(|| FleetError::NotConnected(endpoint.clone()))?;

        if session.is_alive() {
            return Ok(session);
        }

        warn!(endpoint = %endpoint, "session no longer alive, evicting");
        self.remove_if_same(endpoint, &session);
        if let Err(e) = close(&session) {
            debug!(endpoint = %endpoint, "ignoring teardown error on dead link: {e}");
        }
        Err(FleetError::NotConnected(endpoint.clone()))
    }

    fn remove_if_same(&self, endpoint: &Endpoint, session: &Arc<Session>) {
        let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        if sessions
            .get(endpoint)
            .is_some_and(|current| Arc::ptr_eq(current, session))
        {
            sessions.remove(endpoint);
        }
    }

    /// Close `session` and drop its entry if it is still the registered one.
    ///
    /// Used by callers holding a session across several steps, where the
    /// entry may have been replaced or evicted in the meantime. The entry
    /// is dropped even when the terminal rejects the disconnect.
    ///
    /// # Errors
    ///
    /// The transport error from the disconnect, for the caller to report.
    pub fn release(&self, session: &Arc<Session>) -> Result<()> {
        self.remove_if_same(session.endpoint(), session);
        close(session)?;
        info!(endpoint = %session.endpoint(), "session closed");
        Ok(())
    }

    /// Endpoints with a registered session, sorted.
    pub fn connected_endpoints(&self) -> Vec<Endpoint> {
        let mut endpoints: Vec<Endpoint> = self
            .sessions
            .lock()
            .map(|sessions| sessions.keys().cloned().collect())
            .unwrap_or_default();
        endpoints.sort();
        endpoints
    }

    /// Close every session.
    pub fn disconnect_all(&self) {
        for endpoint in self.connected_endpoints() {
            self.disconnect(&endpoint);
        }
    }

    /// Claim exclusive use of `endpoint` for a multi-step operation.
    ///
    /// # Errors
    ///
    /// [`FleetError::Busy`] when another claim is alive.
    pub fn begin_flight(&self, endpoint: &Endpoint) -> Result<FlightGuard> {
        self.flights.begin(endpoint)
    }

    pub fn is_busy(&self, endpoint: &Endpoint) -> bool {
        self.flights.is_active(endpoint)
    }
}

fn close(session: &Session) -> Result<()> {
    session.with_driver_recovering(|driver| driver.disconnect())
}
