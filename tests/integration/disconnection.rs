use crate::*;

/// An owner that stops answering is evicted after repeated timeouts and
/// the routes through it go with its endpoint.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn silent_owner_is_evicted() -> Result<()> {
    let hub = Hub::default();
    let owner = &device(&hub, OWNER, 300, &["/alpha"]);
    let client = &device(&hub, CLIENT, 301, &[]);

    form_group(owner, client).await;
    client.controller.start().await?;

    wait_until(100, || async move {
        routes_toward(client, owner.addr).await.contains(&"/alpha".to_string())
    })
    .await?;
    let endpoint = client
        .controller
        .peer_by_network_addr(&owner.addr)
        .await
        .and_then(|p| p.endpoint)
        .expect("endpoint toward owner");

    hub.detach(&owner.addr);

    wait_until(100, || async move {
        client.controller.peer_by_network_addr(&owner.addr).await.is_none()
    })
    .await?;
    assert!(!client.forwarder.has_face(endpoint));
    assert!(client.forwarder.routes_for(endpoint).is_empty());

    client.controller.stop().await;
    Ok(())
}

/// Losing the group address resets the device: peers forgotten, own
/// discovery prefix withdrawn.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn address_loss_resets_client() -> Result<()> {
    let hub = Hub::default();
    let owner = &device(&hub, OWNER, 300, &["/alpha"]);
    let client = &device(&hub, CLIENT, 301, &[]);

    form_group(owner, client).await;
    client.controller.start().await?;

    wait_until(100, || async move {
        routes_toward(client, owner.addr).await.contains(&"/alpha".to_string())
    })
    .await?;

    client.interface.down();

    wait_until(100, || async move { client.controller.peer_count().await == 0 }).await?;
    wait_until(100, || async move {
        !client.controller.status().await.local_prefix_registered
    })
    .await?;
    let status = client.controller.status().await;
    assert_eq!(status.own_addr, None);
    assert_eq!(status.owner_addr, None);
    assert!(client
        .forwarder
        .routes_for(0)
        .iter()
        .all(|p| p != "/localhop/wifidirect/192.168.49.20"));

    client.controller.stop().await;
    Ok(())
}
