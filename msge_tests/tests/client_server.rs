//! Full socket-based integration tests for client <-> server communication.

use std::time::Duration;

use msge_client::{input::InputState, GameClient};
use msge_server::GameServer;
use msge_shared::{
    action::Action,
    cancel::CancelToken,
    component::{Component, ComponentKind, RenderComponent, TranslateOverTime},
    level::{EntityDef, LevelDef},
    math::{Transform, Vec3},
    protocol::ClientId,
};
use msge_tests::{init_tracing, loopback_config, wait_until};

const DT: f32 = 1.0 / 60.0;

fn translation(client: &GameClient, tag: &str) -> Option<Vec3> {
    let shared = client.shared();
    let world = shared.lock().unwrap();
    world.by_tag(tag).map(|e| e.transform.translation)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn held_button_moves_the_bound_paddle() -> anyhow::Result<()> {
    init_tracing();
    let cfg = loopback_config(47400);
    let mut server = GameServer::new(cfg.clone(), &LevelDef::pong()).await?;
    let mut client = GameClient::connect(cfg, &CancelToken::new()).await?;

    let mut input = InputState::default();
    input.press("w");

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        server.step(DT);
        client.update(DT, input.buttons()).await?;
        if translation(&client, "paddle_left").is_some_and(|t| t.y > 0.5) {
            break;
        }
        anyhow::ensure!(
            tokio::time::Instant::now() < deadline,
            "left paddle never moved up"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    assert_eq!(client.client_id(), Some(ClientId(1)));
    assert_eq!(server.connected_clients(), vec![ClientId(1)]);
    // The right paddle belongs to client 2, which never connected.
    assert_eq!(
        translation(&client, "paddle_right"),
        Some(Vec3::new(8.0, 0.0, 0.0))
    );
    // Goals are server-only and never replicated.
    assert!(translation(&client, "goal_left").is_none());
    assert!(client.scene().len() >= 5);

    client.disconnect().await;
    wait_until(Duration::from_secs(2), || {
        server.step(DT);
        server.connected_clients().is_empty()
    })
    .await?;

    server.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn client_actions_change_server_state() -> anyhow::Result<()> {
    init_tracing();
    let level = LevelDef {
        entities: vec![EntityDef {
            tag: "mover".into(),
            transform: Transform::default(),
            replicate: true,
            components: vec![
                Component::Render(RenderComponent::with_sprite("mover")),
                Component::TranslateOverTime(TranslateOverTime::default()),
            ],
        }],
    };
    let cfg = loopback_config(47410);
    let mut server = GameServer::new(cfg.clone(), &level).await?;
    let mut client = GameClient::connect(cfg, &CancelToken::new()).await?;

    let target = server.entities().by_tag("mover").unwrap().uid();
    client
        .send_actions(vec![
            Action::Translate {
                target,
                delta: Vec3::new(3.0, 0.0, 0.0),
            },
            Action::SetMovingDown {
                target,
                value: true,
            },
        ])
        .await?;

    wait_until(Duration::from_secs(2), || {
        server.step(DT);
        server.entities().get(target).unwrap().transform.translation.x == 3.0
    })
    .await?;

    let mover = server.entities().get(target).unwrap();
    let Some(Component::TranslateOverTime(t)) = mover.component(ComponentKind::TranslateOverTime)
    else {
        panic!("translate-over-time component missing");
    };
    assert!(t.moving_down());

    // The change is replicated back to the client.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while translation(&client, "mover").map(|t| t.x) != Some(3.0) {
        anyhow::ensure!(tokio::time::Instant::now() < deadline, "no replicated move");
        server.step(DT);
        client.update(DT, InputState::default().buttons()).await?;
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    client.disconnect().await;
    server.shutdown().await;
    Ok(())
}
