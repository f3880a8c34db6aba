//! Fleet polling, publishing and command handling.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use sunfleet_common::serialization::Format;
use sunfleet_common::{KeySpace, TelemetryPoint, TelemetryValue};
use sunfleet_core::{DeviceIdentity, Fleet, FleetError, Point, PointSample, ProtocolError};
use sunfleet_sunspec::{PointKind, SunSpecClient, SunSpecField, SunSpecValue};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use zenoh::Session;
use zenoh::sample::SampleKind;

use crate::config::{BridgeConfig, PointConfig};

/// Samples buffered between the poll tasks and the publisher.
const PUBLISH_QUEUE: usize = 1024;

/// How long shutdown waits for queued samples to go out.
const PUBLISH_DRAIN: Duration = Duration::from_secs(5);

/// Bridge errors.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error(transparent)]
    Fleet(#[from] FleetError),

    #[error(transparent)]
    Common(#[from] sunfleet_common::Error),

    #[error("Not a command key: {0}")]
    NotACommand(String),

    #[error("Point {0} is not writable")]
    NotWritable(String),

    #[error("Invalid payload: {0}")]
    Payload(String),
}

type SunSpecFleet = Fleet<SunSpecClient>;

/// Latest factor read from a `sunssf` register, shared with the points it
/// scales. `None` until the first good read.
pub type ScaleCell = Arc<Mutex<Option<i16>>>;

/// Power-of-ten scaling between register and engineering values.
#[derive(Debug, Clone, Default)]
pub enum Scale {
    #[default]
    Raw,
    Fixed(i16),
    Register(ScaleCell),
}

enum Factor {
    Raw,
    Known(i16),
    Unknown,
}

impl Scale {
    fn factor(&self) -> Factor {
        match self {
            Scale::Raw => Factor::Raw,
            Scale::Fixed(sf) => Factor::Known(*sf),
            Scale::Register(cell) => match *cell.lock().unwrap_or_else(PoisonError::into_inner) {
                Some(sf) => Factor::Known(sf),
                None => Factor::Unknown,
            },
        }
    }
}

/// How one configured point is published and commanded.
#[derive(Debug, Clone)]
pub struct Publication {
    pub metric: String,
    pub unit: Option<String>,
    pub scale: Scale,
    /// Symbol names by raw value.
    pub symbols: BTreeMap<String, String>,
}

impl Publication {
    pub fn new(config: &PointConfig, scale: Scale) -> Self {
        Self {
            metric: config.name.clone(),
            unit: config.unit.clone(),
            scale,
            symbols: config.symbols.clone(),
        }
    }

    /// Build the published form of a sample.
    ///
    /// Enum values with a symbol publish the symbol name. Scaled points
    /// publish `value * 10^sf`, or null while their scale register is unread.
    pub fn telemetry(&self, sample: &PointSample<'_, SunSpecField, SunSpecValue>) -> TelemetryPoint {
        let value = sample
            .value
            .map(|value| self.publish_value(value))
            .unwrap_or(TelemetryValue::Null);
        let timestamp = sample
            .read_at
            .map(|at| DateTime::<Utc>::from(at).timestamp_millis())
            .unwrap_or_else(|| Utc::now().timestamp_millis());

        let mut telemetry = TelemetryPoint::new(sample.point.device(), &self.metric, value)
            .at(timestamp)
            .with_fresh(sample.fresh)
            .with_label("field", sample.point.field().to_string());
        if let Some(unit) = &self.unit {
            telemetry = telemetry.with_label("unit", unit);
        }
        telemetry
    }

    fn publish_value(&self, value: &SunSpecValue) -> TelemetryValue {
        if !value.is_implemented() {
            return TelemetryValue::Null;
        }
        if let Some(symbol) = self.symbols.get(&value.to_string()) {
            return TelemetryValue::Text(symbol.clone());
        }
        match self.scale.factor() {
            Factor::Raw => telemetry_value(value),
            Factor::Known(sf) => value
                .scaled(sf)
                .map(TelemetryValue::Float)
                .unwrap_or_else(|| telemetry_value(value)),
            Factor::Unknown => TelemetryValue::Null,
        }
    }

    /// Decode a command payload into the register value to write.
    ///
    /// Accepts a symbol name, or an engineering value that is divided by
    /// `10^sf` for scaled points.
    pub fn command_value(&self, kind: PointKind, text: &str) -> Result<SunSpecValue, BridgeError> {
        let text = text.trim();
        let raw = match self.symbols.iter().find(|(_, name)| name.as_str() == text) {
            Some((raw, _)) => raw.clone(),
            None => match self.scale.factor() {
                Factor::Raw => text.to_string(),
                Factor::Known(sf) => unscale(kind, text, sf)?,
                Factor::Unknown => {
                    return Err(BridgeError::Payload(format!(
                        "scale factor of {} not read yet",
                        self.metric
                    )));
                }
            },
        };
        SunSpecValue::parse(kind, &raw).map_err(|e: ProtocolError| BridgeError::Payload(e.to_string()))
    }
}

/// Register text for engineering value `text` under scale factor `sf`.
fn unscale(kind: PointKind, text: &str, sf: i16) -> Result<String, BridgeError> {
    let value = text
        .parse::<f64>()
        .map_err(|e| BridgeError::Payload(format!("'{}': {}", text, e)))?;
    let raw = value / 10f64.powi(i32::from(sf));
    if !raw.is_finite() {
        return Err(BridgeError::Payload(format!("'{}' is out of range", text)));
    }
    Ok(match kind {
        PointKind::Float32 => raw.to_string(),
        _ => format!("{}", raw.round()),
    })
}

fn record_scale(cell: &ScaleCell, sample: &PointSample<'_, SunSpecField, SunSpecValue>) {
    // A failed read keeps the last known factor.
    if !sample.fresh {
        return;
    }
    let factor = match sample.value {
        Some(SunSpecValue::Signed(sf)) => i16::try_from(*sf).ok(),
        _ => None,
    };
    *cell.lock().unwrap_or_else(PoisonError::into_inner) = factor;
}

/// A writable point and how its payloads decode.
#[derive(Debug, Clone)]
pub struct Command {
    pub point: Point<SunSpecField>,
    pub publication: Arc<Publication>,
}

/// Writable points by (device, point name).
pub type CommandTable = HashMap<(String, String), Command>;

/// Polls the fleet and bridges it to Zenoh.
pub struct Bridge {
    config: BridgeConfig,
    session: Session,
    keys: KeySpace,
}

impl Bridge {
    pub fn new(config: BridgeConfig, session: Session) -> Self {
        let keys = KeySpace::new(config.key_prefix.clone());
        Self {
            config,
            session,
            keys,
        }
    }

    /// Scan the fleet, then poll until Ctrl+C.
    pub async fn run(self) -> Result<(), BridgeError> {
        let mut fleet = Fleet::new(&self.config.fleet, SunSpecClient::new)?;
        let scan = fleet.init().await;
        if !scan.unscanned.is_empty() {
            warn!(devices = ?scan.unscanned, "Some devices could not be scanned");
        }
        for name in fleet.device_names() {
            let identity = fleet.identity(name).await;
            self.put_json(self.keys.info(name), device_info(name, identity.as_ref()))
                .await;
        }

        let (tx, rx) = mpsc::channel(PUBLISH_QUEUE);
        let commands = watch_points(&mut fleet, &self.config.points, &tx)?;
        drop(tx);
        let fleet = Arc::new(fleet);

        let publisher = tokio::spawn(publish_loop(
            self.session.clone(),
            self.keys.clone(),
            self.config.serialization,
            rx,
        ));

        let command_task = if commands.is_empty() {
            None
        } else {
            let subscriber = self
                .session
                .declare_subscriber(self.keys.commands())
                .await
                .map_err(sunfleet_common::Error::Zenoh)?;
            info!(
                key = %self.keys.commands(),
                points = commands.len(),
                "Listening for commands"
            );
            let fleet = fleet.clone();
            let keys = self.keys.clone();
            Some(tokio::spawn(async move {
                while let Ok(sample) = subscriber.recv_async().await {
                    if sample.kind() != SampleKind::Put {
                        continue;
                    }
                    let key = sample.key_expr().as_str().to_string();
                    let payload = sample.payload().to_bytes();
                    match apply_command(&fleet, &keys, &commands, &key, &payload).await {
                        Ok(()) => info!(key = %key, "Applied command"),
                        Err(e) => warn!(key = %key, error = %e, "Rejected command"),
                    }
                }
                debug!("Command subscriber closed");
            }))
        };

        self.publish_status("running", fleet.device_names()).await;
        info!(
            devices = fleet.device_names().len(),
            points = fleet.registry().len(),
            interval_secs = self.config.poll_interval_secs,
            "SunFleet bridge running"
        );

        let mut interval = tokio::time::interval(Duration::from_secs(self.config.poll_interval_secs));
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let summary = fleet.poll().await;
                    if summary.devices_failed > 0 {
                        warn!(
                            failed = summary.devices_failed,
                            devices = summary.devices,
                            "Poll cycle finished with unreachable devices"
                        );
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("Received shutdown signal");
                    break;
                }
            }
        }

        if let Some(task) = command_task {
            task.abort();
            let _ = task.await;
        }
        fleet.close().await;
        let devices = fleet.device_names().to_vec();
        // The watch callbacks own the last senders; the publisher stops once
        // they are gone and the queue is empty.
        drop(fleet);
        if !finish_publisher(publisher, PUBLISH_DRAIN).await {
            warn!(
                timeout_secs = PUBLISH_DRAIN.as_secs(),
                "Publisher did not drain in time, dropped queued samples"
            );
        }
        self.publish_status("offline", &devices).await;
        Ok(())
    }

    async fn publish_status(&self, status: &str, devices: &[String]) {
        let payload = serde_json::json!({
            "bridge": "sunfleet",
            "version": env!("CARGO_PKG_VERSION"),
            "devices": devices,
            "status": status,
        });
        self.put_json(self.keys.status(), payload).await;
    }

    async fn put_json(&self, key: String, payload: serde_json::Value) {
        if let Err(e) = self.session.put(&key, payload.to_string()).await {
            error!(key = %key, error = %e, "Failed to publish");
        }
    }
}

/// Metadata published on `<prefix>/<device>/@/info` after the scan.
///
/// `identity` is null for devices that could not be scanned.
pub fn device_info(device: &str, identity: Option<&DeviceIdentity>) -> serde_json::Value {
    serde_json::json!({
        "device": device,
        "scanned": identity.is_some(),
        "identity": identity,
    })
}

/// Watch every configured point, publishing each sample through `tx`.
///
/// Scale registers named by `scale_offset` are watched first so every cycle
/// reads them before the points they scale. Returns the writable points.
pub fn watch_points(
    fleet: &mut SunSpecFleet,
    points: &[PointConfig],
    tx: &mpsc::Sender<TelemetryPoint>,
) -> Result<CommandTable, BridgeError> {
    let mut scales: HashMap<Point<SunSpecField>, ScaleCell> = HashMap::new();
    for config in points {
        let Some(field) = config.scale_field() else {
            continue;
        };
        let point = fleet.point(&config.device, field)?;
        if scales.contains_key(&point) {
            continue;
        }
        let cell = ScaleCell::default();
        let feed = cell.clone();
        fleet.watch_point(
            point.clone(),
            move |sample: &PointSample<'_, SunSpecField, SunSpecValue>| record_scale(&feed, sample),
        )?;
        scales.insert(point, cell);
    }

    let mut commands = CommandTable::new();
    for config in points {
        let point = fleet.point(&config.device, config.field())?;
        // A published scale register keeps feeding the points it scales.
        let feed = scales.get(&point).cloned();
        if feed.is_none() && fleet.registry().contains(&point) {
            warn!(point = %point, name = %config.name, "Point already watched, replacing");
        }

        let scale = match (config.scale, config.scale_field()) {
            (Some(sf), _) => Scale::Fixed(sf),
            (None, Some(field)) => scales
                .get(&fleet.point(&config.device, field)?)
                .cloned()
                .map(Scale::Register)
                .unwrap_or_default(),
            (None, None) => Scale::Raw,
        };
        let publication = Arc::new(Publication::new(config, scale));

        let publish = publication.clone();
        let tx = tx.clone();
        fleet.watch_point(
            point.clone(),
            move |sample: &PointSample<'_, SunSpecField, SunSpecValue>| {
                if let Some(cell) = &feed {
                    record_scale(cell, sample);
                }
                if let Err(e) = tx.try_send(publish.telemetry(sample)) {
                    warn!(point = %sample.point, error = %e, "Dropping sample");
                }
            },
        )?;

        if config.writable {
            commands.insert(
                (config.device.clone(), config.name.clone()),
                Command { point, publication },
            );
        }
    }
    Ok(commands)
}

fn telemetry_value(value: &SunSpecValue) -> TelemetryValue {
    match value {
        SunSpecValue::Unsigned(v) => TelemetryValue::Unsigned(*v),
        SunSpecValue::Signed(v) => TelemetryValue::Signed(*v),
        SunSpecValue::Float(v) => TelemetryValue::Float(*v),
        SunSpecValue::Text(v) => TelemetryValue::Text(v.clone()),
        SunSpecValue::NotImplemented => TelemetryValue::Null,
    }
}

/// Drain the sample queue into Zenoh until every sender is gone.
async fn publish_loop(
    session: Session,
    keys: KeySpace,
    format: Format,
    mut rx: mpsc::Receiver<TelemetryPoint>,
) {
    while let Some(telemetry) = rx.recv().await {
        let key = keys.point(&telemetry.source, &telemetry.metric);
        match format.encode(&telemetry) {
            Ok(payload) => {
                if let Err(e) = session.put(&key, payload).await {
                    warn!(key = %key, error = %e, "Failed to publish");
                } else {
                    debug!(
                        key = %key,
                        fresh = telemetry.fresh,
                        null = telemetry.value.is_null(),
                        "Published"
                    );
                }
            }
            Err(e) => error!(key = %key, error = %e, "Failed to encode sample"),
        }
    }
}

/// Wait up to `limit` for the publisher to empty its queue, aborting it
/// otherwise. Returns whether it finished on its own.
async fn finish_publisher(mut publisher: JoinHandle<()>, limit: Duration) -> bool {
    match tokio::time::timeout(limit, &mut publisher).await {
        Ok(_) => true,
        Err(_) => {
            publisher.abort();
            false
        }
    }
}

/// Map a command sample to its target point and decoded value.
pub fn resolve_command(
    keys: &KeySpace,
    commands: &CommandTable,
    key: &str,
    payload: &[u8],
) -> Result<(Point<SunSpecField>, SunSpecValue), BridgeError> {
    let target = keys
        .parse_command(key)
        .ok_or_else(|| BridgeError::NotACommand(key.to_string()))?;
    let command = commands
        .get(&(target.device.to_string(), target.point.to_string()))
        .ok_or_else(|| BridgeError::NotWritable(format!("{}/{}", target.device, target.point)))?;

    let text = std::str::from_utf8(payload)
        .map_err(|e| BridgeError::Payload(e.to_string()))?
        .trim();
    // Quoted payloads are JSON strings.
    let text = if text.starts_with('"') {
        serde_json::from_str::<String>(text).map_err(|e| BridgeError::Payload(e.to_string()))?
    } else {
        text.to_string()
    };

    let value = command
        .publication
        .command_value(command.point.field().kind, &text)?;
    Ok((command.point.clone(), value))
}

/// Write a command value, then re-read the point so its new value is
/// published right away.
async fn apply_command(
    fleet: &SunSpecFleet,
    keys: &KeySpace,
    commands: &CommandTable,
    key: &str,
    payload: &[u8],
) -> Result<(), BridgeError> {
    let (point, value) = resolve_command(keys, commands, key, payload)?;
    let start = Instant::now();
    fleet.write_point(&point, &value).await?;
    fleet.poll_one(&point).await?;
    debug!(
        point = %point,
        elapsed_ms = start.elapsed().as_millis() as u64,
        "Wrote and re-read"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::UNIX_EPOCH;

    fn bridge_config() -> BridgeConfig {
        BridgeConfig::parse(
            r#"{
                fleet: {
                    primary: [ { name: "battery", unit_id: 9 }, { name: "rebus_beacon", unit_id: 1 } ],
                    groups: [ { name: "pv_link", unit_ids: [3] } ],
                },
                points: [
                    { name: "soc", device: "battery", model: 802, offset: 9, type: "uint16", unit: "%" },
                    { name: "soc_reserve_min", device: "battery", model: 802, offset: 8, type: "uint16", writable: true },
                    { name: "system_mode", device: "rebus_beacon", model: 64204, offset: 2, type: "enum16", writable: true,
                      symbols: { "0": "SAFETY_SHUTDOWN", "2": "SELF_SUPPLY", "6": "CLEAN_BACKUP" } },
                    { name: "label", device: "rebus_beacon", model: 64204, offset: 10, type: "string4", writable: true },
                    { name: "dc_power", device: "pv_link_3", model: 403, offset: 10, type: "int16", unit: "W", scale_offset: 12 },
                    { name: "dc_power_sf", device: "pv_link_3", model: 403, offset: 12, type: "sunssf" },
                    { name: "export_limit", device: "battery", model: 802, offset: 20, type: "uint16", scale: -1, writable: true },
                ],
            }"#,
        )
        .unwrap()
    }

    fn setup() -> (SunSpecFleet, CommandTable, mpsc::Receiver<TelemetryPoint>) {
        let config = bridge_config();
        let mut fleet = Fleet::new(&config.fleet, SunSpecClient::new).unwrap();
        let (tx, rx) = mpsc::channel(16);
        let commands = watch_points(&mut fleet, &config.points, &tx).unwrap();
        (fleet, commands, rx)
    }

    fn sample_at<'a>(
        point: &'a Point<SunSpecField>,
        value: &'a SunSpecValue,
    ) -> PointSample<'a, SunSpecField, SunSpecValue> {
        PointSample {
            point,
            value: Some(value),
            fresh: true,
            read_at: Some(UNIX_EPOCH + Duration::from_millis(1_700_000_000_123)),
        }
    }

    /// Feed a value to a watched point the way a poll cycle does.
    fn deliver(fleet: &SunSpecFleet, device: &str, field: SunSpecField, value: SunSpecValue) {
        let point = fleet.point(device, field).unwrap();
        fleet
            .registry()
            .entries(device)
            .iter()
            .find(|entry| entry.point() == &point)
            .unwrap()
            .deliver(Some(value));
    }

    fn raw(config: &PointConfig) -> Publication {
        Publication::new(config, Scale::Raw)
    }

    #[test]
    fn test_watch_points_registers_everything() {
        let (fleet, commands, _rx) = setup();

        // dc_power_sf is both a scale register and a published point.
        assert_eq!(fleet.registry().len(), 7);
        assert_eq!(commands.len(), 4);
        assert!(commands.contains_key(&("battery".to_string(), "soc_reserve_min".to_string())));
        assert!(!commands.contains_key(&("battery".to_string(), "soc".to_string())));
    }

    #[test]
    fn test_scale_registers_are_read_first() {
        let (fleet, _commands, _rx) = setup();
        let order: Vec<String> = fleet
            .registry()
            .entries("pv_link_3")
            .iter()
            .map(|entry| entry.point().to_string())
            .collect();

        assert_eq!(order[0], "pv_link_3.403[0]+12:sunssf");
        let power = order
            .iter()
            .position(|point| point == "pv_link_3.403[0]+10:int16")
            .unwrap();
        assert!(power > 0);
    }

    #[test]
    fn test_telemetry() {
        let config = bridge_config();
        let fleet = Fleet::new(&config.fleet, SunSpecClient::new).unwrap();
        let point = fleet
            .point("battery", SunSpecField::new(802, 0, 9, PointKind::Uint16))
            .unwrap();
        let value = SunSpecValue::Unsigned(870);

        let telemetry = raw(&config.points[0]).telemetry(&sample_at(&point, &value));

        assert_eq!(telemetry.source, "battery");
        assert_eq!(telemetry.metric, "soc");
        assert_eq!(telemetry.value, TelemetryValue::Unsigned(870));
        assert_eq!(telemetry.timestamp, 1_700_000_000_123);
        assert!(telemetry.fresh);
        assert_eq!(telemetry.labels["field"], "802[0]+9:uint16");
        assert_eq!(telemetry.labels["unit"], "%");

        let stale = PointSample {
            point: &point,
            value: None,
            fresh: false,
            read_at: None,
        };
        let before = Utc::now().timestamp_millis();
        let telemetry = raw(&config.points[1]).telemetry(&stale);
        assert_eq!(telemetry.value, TelemetryValue::Null);
        assert!(!telemetry.fresh);
        assert!(telemetry.timestamp >= before);
        assert!(!telemetry.labels.contains_key("unit"));
    }

    #[test]
    fn test_telemetry_applies_scale_and_symbols() {
        let config = bridge_config();
        let fleet = Fleet::new(&config.fleet, SunSpecClient::new).unwrap();
        let power = fleet.point("pv_link_3", config.points[4].field()).unwrap();
        let mode = fleet.point("rebus_beacon", config.points[2].field()).unwrap();

        let fixed = Publication::new(&config.points[4], Scale::Fixed(-2));
        let telemetry = fixed.telemetry(&sample_at(&power, &SunSpecValue::Signed(-1234)));
        match telemetry.value {
            TelemetryValue::Float(v) => assert!((v + 12.34).abs() < 1e-9, "{v}"),
            other => panic!("expected a float, got {other:?}"),
        }

        let cell = ScaleCell::default();
        let register = Publication::new(&config.points[4], Scale::Register(cell.clone()));
        let value = SunSpecValue::Signed(512);
        assert_eq!(
            register.telemetry(&sample_at(&power, &value)).value,
            TelemetryValue::Null
        );
        *cell.lock().unwrap() = Some(1);
        assert_eq!(
            register.telemetry(&sample_at(&power, &value)).value,
            TelemetryValue::Float(5120.0)
        );
        assert_eq!(
            register
                .telemetry(&sample_at(&power, &SunSpecValue::NotImplemented))
                .value,
            TelemetryValue::Null
        );

        let symbols = raw(&config.points[2]);
        assert_eq!(
            symbols.telemetry(&sample_at(&mode, &SunSpecValue::Unsigned(2))).value,
            TelemetryValue::Text("SELF_SUPPLY".into())
        );
        assert_eq!(
            symbols.telemetry(&sample_at(&mode, &SunSpecValue::Unsigned(4))).value,
            TelemetryValue::Unsigned(4)
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_scale_register_feeds_scaled_point() {
        let (fleet, _commands, mut rx) = setup();
        let power = SunSpecField::new(403, 0, 10, PointKind::Int16);
        let power_sf = SunSpecField::new(403, 0, 12, PointKind::Sunssf);

        deliver(&fleet, "pv_link_3", power.clone(), SunSpecValue::Signed(731));
        let telemetry = rx.recv().await.unwrap();
        assert_eq!(telemetry.metric, "dc_power");
        assert_eq!(telemetry.value, TelemetryValue::Null);

        deliver(&fleet, "pv_link_3", power_sf, SunSpecValue::Signed(2));
        let telemetry = rx.recv().await.unwrap();
        assert_eq!(telemetry.metric, "dc_power_sf");
        assert_eq!(telemetry.value, TelemetryValue::Signed(2));

        deliver(&fleet, "pv_link_3", power, SunSpecValue::Signed(731));
        let telemetry = rx.recv().await.unwrap();
        assert_eq!(telemetry.value, TelemetryValue::Float(73100.0));
    }

    #[test]
    fn test_not_implemented_publishes_null() {
        assert_eq!(
            telemetry_value(&SunSpecValue::NotImplemented),
            TelemetryValue::Null
        );
        assert_eq!(
            telemetry_value(&SunSpecValue::Signed(-3)),
            TelemetryValue::Signed(-3)
        );
    }

    #[test]
    fn test_resolve_command() {
        let (_fleet, commands, _rx) = setup();
        let keys = KeySpace::default();

        let (point, value) = resolve_command(
            &keys,
            &commands,
            "sunfleet/battery/soc_reserve_min/set",
            b" 35\n",
        )
        .unwrap();
        assert_eq!(point.device(), "battery");
        assert_eq!(point.field().offset, 8);
        assert_eq!(value, SunSpecValue::Unsigned(35));

        let (_, value) =
            resolve_command(&keys, &commands, "sunfleet/rebus_beacon/label/set", br#""abc""#)
                .unwrap();
        assert_eq!(value, SunSpecValue::Text("abc".into()));
    }

    #[test]
    fn test_resolve_command_symbols_and_scale() {
        let (_fleet, commands, _rx) = setup();
        let keys = KeySpace::default();
        let mode = "sunfleet/rebus_beacon/system_mode/set";

        let (_, value) = resolve_command(&keys, &commands, mode, br#""CLEAN_BACKUP""#).unwrap();
        assert_eq!(value, SunSpecValue::Unsigned(6));
        let (_, value) = resolve_command(&keys, &commands, mode, b"2").unwrap();
        assert_eq!(value, SunSpecValue::Unsigned(2));
        assert!(matches!(
            resolve_command(&keys, &commands, mode, b"TURBO"),
            Err(BridgeError::Payload(_))
        ));

        // scale -1: 250.4 W is register value 2504
        let limit = "sunfleet/battery/export_limit/set";
        let (_, value) = resolve_command(&keys, &commands, limit, b"250.4").unwrap();
        assert_eq!(value, SunSpecValue::Unsigned(2504));
        assert!(matches!(
            resolve_command(&keys, &commands, limit, b"-3"),
            Err(BridgeError::Payload(_))
        ));
    }

    #[test]
    fn test_command_waits_for_scale_register() {
        let config = bridge_config();
        let cell = ScaleCell::default();
        let publication = Publication::new(&config.points[4], Scale::Register(cell.clone()));

        assert!(matches!(
            publication.command_value(PointKind::Int16, "12"),
            Err(BridgeError::Payload(_))
        ));
        *cell.lock().unwrap() = Some(2);
        assert_eq!(
            publication.command_value(PointKind::Int16, "-1200").unwrap(),
            SunSpecValue::Signed(-12)
        );
    }

    #[test]
    fn test_resolve_command_rejections() {
        let (_fleet, commands, _rx) = setup();
        let keys = KeySpace::default();

        assert!(matches!(
            resolve_command(&keys, &commands, "sunfleet/battery/soc_reserve_min", b"35"),
            Err(BridgeError::NotACommand(_))
        ));
        assert!(matches!(
            resolve_command(&keys, &commands, "sunfleet/battery/soc/set", b"35"),
            Err(BridgeError::NotWritable(_))
        ));
        assert!(matches!(
            resolve_command(&keys, &commands, "sunfleet/rebus_beacon/system_mode/set", b"-1"),
            Err(BridgeError::Payload(_))
        ));
        assert!(matches!(
            resolve_command(&keys, &commands, "sunfleet/battery/soc_reserve_min/set", &[0xff, 0xfe]),
            Err(BridgeError::Payload(_))
        ));
    }

    #[test]
    fn test_device_info() {
        let identity = DeviceIdentity {
            manufacturer: "Generac".into(),
            model: "PWRcell Inverter".into(),
            options: String::new(),
            version: "12345".into(),
            serial_number: "0001A2B3".into(),
        };

        let info = device_info("inverter", Some(&identity));
        assert_eq!(info["device"], "inverter");
        assert_eq!(info["scanned"], true);
        assert_eq!(info["identity"]["manufacturer"], "Generac");
        assert_eq!(info["identity"]["serial_number"], "0001A2B3");

        let info = device_info("pv_link_3", None);
        assert_eq!(info["scanned"], false);
        assert!(info["identity"].is_null());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_dropping_fleet_releases_publisher() {
        let (fleet, _commands, mut rx) = setup();
        deliver(
            &fleet,
            "battery",
            SunSpecField::new(802, 0, 9, PointKind::Uint16),
            SunSpecValue::Unsigned(500),
        );
        let drained = Arc::new(AtomicUsize::new(0));
        let counter = drained.clone();
        let publisher = tokio::spawn(async move {
            while rx.recv().await.is_some() {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        drop(fleet);
        assert!(finish_publisher(publisher, Duration::from_secs(5)).await);
        assert_eq!(drained.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_stuck_publisher_is_aborted() {
        let (_tx, mut rx) = mpsc::channel::<TelemetryPoint>(1);
        let publisher = tokio::spawn(async move { while rx.recv().await.is_some() {} });

        let start = Instant::now();
        assert!(!finish_publisher(publisher, Duration::from_millis(50)).await);
        assert!(start.elapsed() < Duration::from_secs(5));
    }
}
