/// 并发推理与模型替换测试
///
/// 多个推理任务与一个替换任务同时访问共享模型，
/// 验证每次推理看到的都是某个完整的模型（不会出现新旧混合的结果）

use bluroom::algorithms::{
    ClassifierModel, IdentifierUniverse, NormalizationParams, SoftmaxRegression, TrainedModel,
};
use bluroom::artifacts::{ArtifactManifest, FORMAT_VERSION, ModelArtifacts};
use bluroom::config::{ServingConfig, TaskKind};
use bluroom::inference::LoadedModel;
use bluroom::service::{EstimateResponse, EstimationService, SharedModel};
use chrono::Utc;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::task;
use tokio::time::sleep;

/// 输出固定概率的模型：`bias` 决定各类别概率
fn fixed_model(bias: Vec<f64>) -> LoadedModel {
    let classes = vec!["room1".to_string(), "room2".to_string()];
    let artifacts = ModelArtifacts {
        manifest: ArtifactManifest {
            format_version: FORMAT_VERSION,
            task: TaskKind::Classification,
            created_at: Utc::now(),
            sample_count: 0,
            classes: Some(classes.clone()),
            selected: "fixed".to_string(),
            held_out: None,
        },
        universe: IdentifierUniverse::from_identifiers(vec!["A".to_string(), "B".to_string()])
            .unwrap(),
        normalization: NormalizationParams::identity(2),
        model: TrainedModel::Classifier {
            classes,
            model: ClassifierModel::Logistic(
                SoftmaxRegression::from_parts(vec![vec![0.0, 0.0]; 2], bias).unwrap(),
            ),
        },
    };
    LoadedModel::new(artifacts).unwrap()
}

/// room1 = 0.9
fn model_a() -> LoadedModel {
    fixed_model(vec![9f64.ln(), 0.0])
}

/// room2 = 0.8
fn model_b() -> LoadedModel {
    fixed_model(vec![0.0, 4f64.ln()])
}

fn room(id: &str, pct: u32) -> EstimateResponse {
    EstimateResponse::Room {
        room_id: id.to_string(),
        percentage_processed: pct,
    }
}

#[tokio::test]
async fn test_concurrent_predict_during_swap() {
    println!("\n========== 并发推理与模型替换测试 ==========\n");

    let shared = Arc::new(SharedModel::new(model_a()));
    let service = EstimationService::new(Arc::clone(&shared), ServingConfig::default());
    let batch: &'static [u8] = b"1,A,-60\n2,B,-70\n2,Z,-40\n";

    let first = room("room1", 90);
    let second = room("room2", 80);

    // 启动 5 个推理任务
    let seen_b = Arc::new(AtomicUsize::new(0));
    let mut readers = vec![];
    for i in 1..=5 {
        let service = service.clone();
        let first = first.clone();
        let second = second.clone();
        let seen_b = Arc::clone(&seen_b);
        readers.push(task::spawn(async move {
            for _ in 0..20 {
                let response = service.estimate(&[batch]).unwrap();
                assert!(response == first || response == second, "混合结果: {:?}", response);
                if response == second {
                    seen_b.fetch_add(1, Ordering::Relaxed);
                }
                sleep(Duration::from_millis(5)).await;
            }
            println!("✓ 推理任务 {} 完成", i);
        }));
    }

    // 替换任务：A 与 B 之间来回切换，最后停在 B
    let writer_model = Arc::clone(&shared);
    let writer = task::spawn(async move {
        for j in 0..10 {
            let next = if j % 2 == 0 { model_b() } else { model_a() };
            writer_model.replace(next);
            sleep(Duration::from_millis(7)).await;
        }
        writer_model.replace(model_b());
        println!("✓ 替换任务完成");
    });

    for handle in readers {
        handle.await.unwrap();
    }
    writer.await.unwrap();

    // 替换完成后的新请求一定看到 B
    assert_eq!(service.estimate(&[batch]).unwrap(), second);
    println!("✓ 推理期间观察到 B 模型 {} 次", seen_b.load(Ordering::Relaxed));

    println!("\n========== 测试完成 ==========\n");
}

#[tokio::test]
async fn test_held_model_survives_replace() {
    let shared = SharedModel::new(model_a());
    let held = shared.current();

    let old = shared.replace(model_b());
    assert!(Arc::ptr_eq(&old, &held));

    // 已取得的旧模型仍然可用
    let obs = vec![bluroom::algorithms::Observation::new(1, "A", -60)];
    let result = held.predict_observations(&obs).unwrap();
    assert_eq!(result.room_id(), Some("room1"));
    assert_eq!(shared.current().predict_observations(&obs).unwrap().room_id(), Some("room2"));
}

#[tokio::test]
async fn test_positive_class_response() {
    let shared = Arc::new(SharedModel::new(model_a()));
    let config = ServingConfig {
        positive_class: Some("room2".to_string()),
        ..ServingConfig::default()
    };
    let service = EstimationService::new(shared, config);
    assert_eq!(service.estimate(&[b"1,A,-60\n".as_slice()]).unwrap(), room("room2", 10));

    let health = service.health();
    assert_eq!(health.status, "running");
    assert_eq!(health.features, 2);
}
