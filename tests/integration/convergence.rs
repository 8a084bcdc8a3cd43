use crate::*;

/// Owner and client each end up routing the other's prefixes toward it,
/// and never re-advertise what they learned.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn two_devices_exchange_prefixes() -> Result<()> {
    let hub = Hub::default();
    let owner = &device(&hub, OWNER, 300, &["/alpha"]);
    let client = &device(&hub, CLIENT, 301, &["/bravo"]);

    form_group(owner, client).await;
    owner.controller.start().await?;
    client.controller.start().await?;

    wait_until(100, || async move {
        routes_toward(client, owner.addr).await.contains(&"/alpha".to_string())
            && routes_toward(owner, client.addr).await.contains(&"/bravo".to_string())
    })
    .await?;

    // Learned routes stay off the advertisement: the client does not send
    // /alpha back to the owner.
    let toward_client = routes_toward(owner, client.addr).await;
    assert!(!toward_client.contains(&"/alpha".to_string()));
    // Discovery prefixes are local scope and not reconciled, but each side
    // routes the other's discovery prefix toward it.
    assert!(toward_client.contains(&"/localhop/wifidirect/192.168.49.20".to_string()));
    let toward_owner = routes_toward(client, owner.addr).await;
    assert!(toward_owner.contains(&"/localhop/wifidirect/192.168.49.1".to_string()));
    assert!(!toward_owner.contains(&"/bravo".to_string()));

    let status = owner.controller.status().await;
    assert_eq!(status.members, 1);
    assert!(status.local_prefix_registered);

    owner.controller.stop().await;
    client.controller.stop().await;
    Ok(())
}

/// A prefix that disappears on the owner is withdrawn on the client.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn withdrawn_prefix_follows_owner() -> Result<()> {
    let hub = Hub::default();
    let owner = &device(&hub, OWNER, 300, &["/alpha", "/charlie"]);
    let client = &device(&hub, CLIENT, 301, &[]);

    form_group(owner, client).await;
    client.controller.start().await?;

    wait_until(100, || async move {
        routes_toward(client, owner.addr).await.contains(&"/charlie".to_string())
    })
    .await?;

    owner
        .controller
        .routes()
        .remove("/charlie".to_string(), vec![300])
        .await
        .map_err(anyhow::Error::msg)?;

    wait_until(100, || async move {
        let routes = routes_toward(client, owner.addr).await;
        routes.contains(&"/alpha".to_string()) && !routes.contains(&"/charlie".to_string())
    })
    .await?;

    client.controller.stop().await;
    Ok(())
}
