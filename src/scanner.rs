/// BLE 采集
///
/// 定时轮询蓝牙适配器，把名称匹配的设备的 RSSI 记为观测。
/// 同一轮扫描的观测共用一个时间戳，即一个指纹。

use crate::algorithms::Observation;
use crate::corpus::write_records;
use crate::error::ScanError;
use btleplug::api::{Central, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::Manager as PlatformManager;
use chrono::Utc;
use regex::Regex;
use std::path::Path;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::time::sleep;

/// 一轮扫描的结果
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Sweep {
    pub timestamp: i64,
    pub observations: Vec<Observation>,
}

/// 扫描到的设备
#[derive(Clone, Debug)]
pub struct DeviceReading {
    pub name: Option<String>,
    pub address: String,
    pub rssi: Option<i16>,
}

/// 信标采集器
#[derive(Clone, Debug)]
pub struct BeaconScanner {
    /// 设备名称过滤
    pattern: Regex,
    /// 扫描间隔
    interval: Duration,
}

impl BeaconScanner {
    pub fn new(name_pattern: &str, interval: Duration) -> Result<Self, ScanError> {
        Ok(BeaconScanner {
            pattern: Regex::new(name_pattern)?,
            interval,
        })
    }

    /// 把一轮扫描到的设备转换为观测；无名称或无 RSSI 的设备被忽略
    pub fn sweep_from<I>(&self, timestamp: i64, devices: I) -> Sweep
    where
        I: IntoIterator<Item = DeviceReading>,
    {
        let observations = devices
            .into_iter()
            .filter_map(|device| {
                let name = device.name?;
                let rssi = device.rssi?;
                self.pattern
                    .is_match(&name)
                    .then(|| Observation::new(timestamp, device.address, rssi))
            })
            .collect();
        Sweep {
            timestamp,
            observations,
        }
    }

    /// 采集 `duration` 时长，每轮结果发送到 `tx`
    ///
    /// 接收端关闭时提前结束；返回发送的轮数
    pub async fn capture(&self, duration: Duration, tx: mpsc::Sender<Sweep>) -> Result<usize, ScanError> {
        let manager = PlatformManager::new().await?;
        let adapters = manager.adapters().await?;
        let adapter = adapters.into_iter().next().ok_or(ScanError::NoAdapter)?;

        adapter.start_scan(ScanFilter::default()).await?;
        tracing::info!(pattern = %self.pattern, ?duration, "蓝牙扫描已启动");

        let start = Instant::now();
        let mut sweeps = 0;
        while start.elapsed() < duration {
            let mut devices = Vec::new();
            for peripheral in adapter.peripherals().await? {
                if let Ok(Some(props)) = peripheral.properties().await {
                    devices.push(DeviceReading {
                        name: props.local_name,
                        address: peripheral.address().to_string(),
                        rssi: props.rssi,
                    });
                }
            }

            let sweep = self.sweep_from(Utc::now().timestamp_millis(), devices);
            tracing::debug!(
                timestamp = sweep.timestamp,
                devices = sweep.observations.len(),
                "扫描一轮"
            );
            if !sweep.observations.is_empty() {
                if tx.send(sweep).await.is_err() {
                    tracing::warn!("接收端已关闭，停止扫描");
                    break;
                }
                sweeps += 1;
            }

            sleep(self.interval).await;
        }

        adapter.stop_scan().await?;
        tracing::info!(sweeps, "蓝牙扫描结束");
        Ok(sweeps)
    }
}

/// 收集所有扫描轮次的观测，直到发送端全部关闭
pub async fn collect_sweeps(mut rx: mpsc::Receiver<Sweep>) -> Vec<Observation> {
    let mut observations = Vec::new();
    while let Some(sweep) = rx.recv().await {
        observations.extend(sweep.observations);
    }
    observations
}

/// 写出为记录文件
pub fn save_records(path: &Path, observations: &[Observation]) -> Result<(), ScanError> {
    let write_err = |reason: String| ScanError::Write {
        path: path.to_path_buf(),
        reason,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| write_err(e.to_string()))?;
    }
    let file = std::fs::File::create(path).map_err(|e| write_err(e.to_string()))?;
    write_records(std::io::BufWriter::new(file), observations).map_err(|e| write_err(e.to_string()))
}
