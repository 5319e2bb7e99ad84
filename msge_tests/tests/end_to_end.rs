//! Handshake on 5204, redirect to 5205, one replicated ball.
//!
//! Kept alone in its own test binary: the ball must be the first entity this
//! process creates so it gets UID 0.

use std::time::Duration;

use msge_client::GameClient;
use msge_server::GameServer;
use msge_shared::{
    cancel::CancelToken,
    component::{Component, PaddleButtons, RenderComponent},
    ecs::EntityId,
    level::{EntityDef, LevelDef},
    math::{Transform, Vec3},
};
use msge_tests::{init_tracing, loopback_config};

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn ball_snapshot_reaches_client() -> anyhow::Result<()> {
    init_tracing();

    let level = LevelDef {
        entities: vec![EntityDef {
            tag: "ball".into(),
            transform: Transform::default(),
            replicate: true,
            components: vec![Component::Render(RenderComponent::with_sprite("ball"))],
        }],
    };
    let cfg = loopback_config(5204);
    let mut server = GameServer::new(cfg.clone(), &level).await?;

    let cancel = CancelToken::new();
    let mut client = GameClient::connect(cfg, &cancel).await?;
    assert_eq!(client.server_port(), 5205);
    assert_eq!(server.allocated_ports(), vec![5205]);

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while client.snapshots_applied() == 0 {
        anyhow::ensure!(
            tokio::time::Instant::now() < deadline,
            "no snapshot within 5s"
        );
        server.step(1.0 / 60.0);
        client.update(1.0 / 60.0, PaddleButtons::empty()).await?;
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    {
        let shared = client.shared();
        let world = shared.lock().unwrap();
        assert_eq!(world.len(), 1);
        let ball = world.get(EntityId(0)).expect("ball with uid 0");
        assert_eq!(ball.tag, "ball");
        assert_eq!(ball.transform.translation, Vec3::ZERO);
    }
    // The render pass created one scene node for the ball sprite.
    assert_eq!(client.scene().len(), 1);

    client.disconnect().await;
    server.shutdown().await;
    Ok(())
}
