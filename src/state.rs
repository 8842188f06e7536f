//! The shared record (§3): a single `repr(C)` aggregate mapped `MAP_SHARED`
//! by the supervisor and every actor. Lives at a fixed address inside the
//! `drone_shm` object; nothing in here is heap-allocated, so the whole
//! struct is safe to place directly in mapped memory and reinterpret across
//! the `fork()` boundary.

use crate::sync::{ActionRwLock, BinaryMutex, GpsRing};
use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};

/// One-hot bitmask encoding, matching the wire format used by the operator
/// UDP command and the `ACTION = <numeric mode>` telemetry line (§3, §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Mode {
    Reserved = 1,
    SampleGps = 2,
    Fly = 4,
    Land = 8,
    Idle = 16,
    Charge = 32,
    Abort = 64,
}

impl Mode {
    /// Decodes a raw bitmask value, rejecting anything that isn't exactly
    /// one of the seven enumerated bits.
    pub fn from_bits(bits: u32) -> Option<Mode> {
        match bits {
            1 => Some(Mode::Reserved),
            2 => Some(Mode::SampleGps),
            4 => Some(Mode::Fly),
            8 => Some(Mode::Land),
            16 => Some(Mode::Idle),
            32 => Some(Mode::Charge),
            64 => Some(Mode::Abort),
            _ => None,
        }
    }

    pub fn bits(self) -> u32 {
        self as u32
    }

    /// Membership test against a bitwise-OR'd mask of other `Mode` values,
    /// e.g. `mode.is_one_of(Mode::Fly.bits() | Mode::Abort.bits())`.
    pub fn is_one_of(self, mask: u32) -> bool {
        self.bits() & mask != 0
    }

    /// Decodes the 4-byte little-endian wire encoding used by the operator
    /// UDP command protocol (§6). `None` if the datagram size is wrong or
    /// the value doesn't match a known mode bit.
    pub fn from_wire(datagram: &[u8]) -> Option<Mode> {
        if datagram.len() != 4 {
            return None;
        }
        let bits = u32::from_le_bytes([datagram[0], datagram[1], datagram[2], datagram[3]]);
        Mode::from_bits(bits)
    }

    pub fn to_wire(self) -> [u8; 4] {
        self.bits().to_le_bytes()
    }

    pub fn from_command_word(word: &str) -> Option<Mode> {
        match word.trim().to_ascii_lowercase().as_str() {
            "fly" => Some(Mode::Fly),
            "samplegps" => Some(Mode::SampleGps),
            "land" => Some(Mode::Land),
            "idle" => Some(Mode::Idle),
            "charge" => Some(Mode::Charge),
            "abort" => Some(Mode::Abort),
            _ => None,
        }
    }
}

/// Identity and role of the six forked actors, indexed by `ActorId`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(usize)]
pub enum ActorId {
    Battery = 0,
    Accelerometer = 1,
    Gps = 2,
    FlightController = 3,
    Telemetry = 4,
    Watchdog = 5,
}

pub const ACTOR_COUNT: usize = 6;

pub const ACTOR_IDS: [ActorId; ACTOR_COUNT] = [
    ActorId::Battery,
    ActorId::Accelerometer,
    ActorId::Gps,
    ActorId::FlightController,
    ActorId::Telemetry,
    ActorId::Watchdog,
];

impl ActorId {
    pub fn name(self) -> &'static str {
        match self {
            ActorId::Battery => "battery",
            ActorId::Accelerometer => "accelerometer",
            ActorId::Gps => "gps",
            ActorId::FlightController => "flight_ctrl",
            ActorId::Telemetry => "telemetry",
            ActorId::Watchdog => "watchdog",
        }
    }
}

/// `INET_ADDRSTRLEN`-sized byte buffer, `repr(C)`/`Copy`-safe, used instead
/// of a heap string so the whole record stays placement-safe in shared
/// memory (§3).
pub const ADDR_BUF_LEN: usize = 16;

#[derive(Clone, Copy)]
#[repr(C)]
pub struct AddrBuf {
    bytes: [u8; ADDR_BUF_LEN],
    len: u8,
}

impl AddrBuf {
    pub fn new(s: &str) -> Option<AddrBuf> {
        if s.len() >= ADDR_BUF_LEN {
            return None;
        }
        let mut bytes = [0u8; ADDR_BUF_LEN];
        bytes[..s.len()].copy_from_slice(s.as_bytes());
        Some(AddrBuf { bytes, len: s.len() as u8 })
    }

    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.bytes[..self.len as usize]).unwrap_or("")
    }
}

/// Written once by the supervisor before any actor is spawned; treated as
/// immutable for the remainder of the program's lifetime (§3).
#[derive(Clone, Copy)]
#[repr(C)]
pub struct NetworkConfig {
    pub operator_host: AddrBuf,
    pub telemetry_port: u16,
    pub drone_host: AddrBuf,
    pub flight_ctrl_port: u16,
}

/// Acceleration triple, `(x, y, z)` in the stylized thrust units of §4.3.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[repr(C)]
pub struct Accel {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

/// Four motor PWM duty cycles, each clamped to `[0, 1]` (§3).
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[repr(C)]
pub struct Pwm {
    pub motors: [f32; 4],
}

impl Pwm {
    pub fn avg(&self) -> f32 {
        self.motors.iter().sum::<f32>() / self.motors.len() as f32
    }
}

/// Per-actor pid, `0` until the supervisor has spawned that role for the
/// first time. Writable only by the supervisor (§3).
pub struct IdentityTable {
    pids: [AtomicU32; ACTOR_COUNT],
}

impl IdentityTable {
    fn new() -> Self {
        IdentityTable {
            pids: std::array::from_fn(|_| AtomicU32::new(0)),
        }
    }

    pub fn set(&self, actor: ActorId, pid: u32) {
        self.pids[actor as usize].store(pid, Ordering::Release);
    }

    pub fn get(&self, actor: ActorId) -> u32 {
        self.pids[actor as usize].load(Ordering::Acquire)
    }
}

/// One counter per publishing actor; the watchdog does not publish one of
/// its own (§3).
pub struct Heartbeats {
    counters: [AtomicU32; ACTOR_COUNT],
}

impl Heartbeats {
    fn new() -> Self {
        Heartbeats {
            counters: std::array::from_fn(|_| AtomicU32::new(0)),
        }
    }

    pub fn tick(&self, actor: ActorId) {
        self.counters[actor as usize].fetch_add(1, Ordering::Release);
    }

    pub fn read(&self, actor: ActorId) -> u32 {
        self.counters[actor as usize].load(Ordering::Acquire)
    }
}

/// The single shared aggregate (§3). Every actor maps the same instance via
/// `drone_shm`; no actor ever holds a private copy of any field here.
#[repr(C)]
pub struct SharedRecord {
    pub identity: IdentityTable,
    pub network: NetworkConfig,
    pub heartbeats: Heartbeats,
    pub action: ActionRwLock,
    pub accel: BinaryMutex<Accel>,
    pub pwm: BinaryMutex<Pwm>,
    pub gps_ring: GpsRing,
    pub battery: AtomicU8,
}

impl SharedRecord {
    /// Placement-constructs an all-zero/uninitialized record. The caller
    /// (the supervisor, via `shm::map`) writes this directly into the
    /// mapped region and then calls `init` exactly once.
    pub fn new_uninit(network: NetworkConfig) -> Self {
        SharedRecord {
            identity: IdentityTable::new(),
            network,
            heartbeats: Heartbeats::new(),
            action: ActionRwLock::new_uninit(),
            accel: BinaryMutex::new_uninit(Accel::default()),
            pwm: BinaryMutex::new_uninit(Pwm::default()),
            gps_ring: GpsRing::new_uninit(),
            battery: AtomicU8::new(100),
        }
    }

    /// Initializes every synchronization primitive and resets all data
    /// fields to their documented initial values (§3). Called exactly once
    /// by the supervisor before forking any actor.
    ///
    /// # Safety
    /// Must run before any other process observes this record.
    pub unsafe fn init(&mut self) {
        self.action.reset(Mode::Idle);
        self.accel.reset(Accel::default());
        self.pwm.reset(Pwm::default());
        self.gps_ring.reset();
        self.battery.store(100, Ordering::Release);
    }

    /// Reinitializes only the embedded semaphores, preserving every data
    /// field — the stall-recovery path (§4.7, §9).
    ///
    /// # Safety
    /// No actor may be running when this is called.
    pub unsafe fn reinit_primitives_only(&mut self) {
        self.action.reinit_primitives_only();
        self.accel.reinit_primitive_only();
        self.pwm.reinit_primitive_only();
        self.gps_ring.reinit_primitives_only();
    }

    pub fn battery_pct(&self) -> u8 {
        self.battery.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_wire_round_trip() {
        for mode in [
            Mode::Reserved,
            Mode::SampleGps,
            Mode::Fly,
            Mode::Land,
            Mode::Idle,
            Mode::Charge,
            Mode::Abort,
        ] {
            assert_eq!(Mode::from_wire(&mode.to_wire()), Some(mode));
        }
    }

    #[test]
    fn mode_wire_rejects_bad_size() {
        assert_eq!(Mode::from_wire(&[4, 0, 0]), None);
        assert_eq!(Mode::from_wire(&[4, 0, 0, 0, 0]), None);
    }

    #[test]
    fn mode_wire_rejects_unknown_bits() {
        assert_eq!(Mode::from_wire(&3u32.to_le_bytes()), None);
    }

    #[test]
    fn mode_membership() {
        assert!(Mode::Fly.is_one_of(Mode::Fly.bits() | Mode::Abort.bits()));
        assert!(!Mode::Idle.is_one_of(Mode::Fly.bits() | Mode::Abort.bits()));
    }

    #[test]
    fn addr_buf_round_trips() {
        let buf = AddrBuf::new("127.0.0.1").unwrap();
        assert_eq!(buf.as_str(), "127.0.0.1");
    }

    #[test]
    fn addr_buf_rejects_too_long() {
        assert!(AddrBuf::new("this-hostname-is-definitely-too-long-for-the-buffer").is_none());
    }

    #[test]
    fn pwm_avg() {
        let pwm = Pwm { motors: [0.2, 0.4, 0.6, 0.8] };
        assert!((pwm.avg() - 0.5).abs() < 1e-6);
    }

    #[test]
    fn command_word_parses_case_insensitively() {
        assert_eq!(Mode::from_command_word("FLY"), Some(Mode::Fly));
        assert_eq!(Mode::from_command_word("SampleGPS\n"), Some(Mode::SampleGps));
        assert_eq!(Mode::from_command_word("nonsense"), None);
    }
}
