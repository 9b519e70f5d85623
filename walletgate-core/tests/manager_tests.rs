mod common;

use common::{auto_deny, auto_grant, completes, harness, harness_with_config, RequestCollector};
use common::{ADMIN, APP};
use serde_json::json;
use walletgate_core::{
    audit_label, GrantOptions, PermissionDescriptor, PermissionEvent, PermissionsConfig,
    ProtocolUsage, Wallet, WalletError,
};

// ===== Admin and info queries =====

#[tokio::test]
async fn test_admin_calls_are_forwarded_unchanged() {
    let h = harness();
    let args = json!({
        "description": "admin housekeeping",
        "labels": ["admin internal"],
        "outputs": [{"satoshis": 5000, "basket": "default"}]
    });

    completes(h.manager.create_action(args.clone(), ADMIN))
        .await
        .unwrap();

    let calls = h.wallet.calls_to("create_action");
    assert_eq!(calls.len(), 1);
    // No audit label, no metadata encryption
    assert_eq!(calls[0].args, args);
    assert!(h.manager.pending_requests().is_empty());
    assert_eq!(h.manager.spent_this_month(ADMIN).await.unwrap(), 0);
}

#[tokio::test]
async fn test_info_queries_skip_checks() {
    let h = harness();
    completes(async {
        h.manager.get_height(json!({}), APP).await.unwrap();
        h.manager.get_network(json!({}), APP).await.unwrap();
        h.manager.get_version(json!({}), APP).await.unwrap();
        h.manager.is_authenticated(json!({}), APP).await.unwrap();
        h.manager
            .get_header_for_height(json!({"height": 1}), APP)
            .await
            .unwrap();
    })
    .await;
    assert_eq!(h.wallet.call_count(), 5);
}

// ===== Reserved names =====

#[tokio::test]
async fn test_default_basket_denied_regardless_of_flags() {
    let config = PermissionsConfig::new(ADMIN).with_seek_basket_insertion_permissions(false);
    let h = harness_with_config(config);

    let err = completes(h.manager.create_action(
        json!({"outputs": [{"satoshis": 1, "basket": "default"}]}),
        APP,
    ))
    .await
    .unwrap_err();

    assert!(err.is_permission_denied());
    assert!(h.wallet.calls_to("create_action").is_empty());
}

#[tokio::test]
async fn test_admin_labels_and_protocols_denied() {
    let h = harness();

    let err = completes(h.manager.create_action(
        json!({"labels": ["admin originator someone-else"]}),
        APP,
    ))
    .await
    .unwrap_err();
    assert!(err.is_permission_denied());

    let err = completes(h.manager.encrypt(
        json!({"protocolID": [2, "admin metadata encryption"], "keyID": "1", "plaintext": [1]}),
        APP,
    ))
    .await
    .unwrap_err();
    assert!(err.is_permission_denied());
}

// ===== Classification =====

#[tokio::test]
async fn test_open_protocol_needs_no_token() {
    let h = harness();
    let collector = RequestCollector::new();
    collector.bind(&h.manager, PermissionEvent::ProtocolPermissionRequested);

    completes(h.manager.create_signature(
        json!({"protocolID": [0, "open signing"], "keyID": "1", "data": [1, 2]}),
        APP,
    ))
    .await
    .unwrap();
    assert_eq!(collector.count(), 0);
}

#[tokio::test]
async fn test_create_action_checks_baskets_labels_and_spending() {
    let h = harness();
    let protocol = RequestCollector::new();
    let basket = RequestCollector::new();
    let spending = RequestCollector::new();
    protocol.bind(&h.manager, PermissionEvent::ProtocolPermissionRequested);
    basket.bind(&h.manager, PermissionEvent::BasketAccessRequested);
    spending.bind(&h.manager, PermissionEvent::SpendingAuthorizationRequested);
    auto_grant(&h.manager, PermissionEvent::ProtocolPermissionRequested, GrantOptions::default());
    auto_grant(&h.manager, PermissionEvent::BasketAccessRequested, GrantOptions::default());
    auto_grant(
        &h.manager,
        PermissionEvent::SpendingAuthorizationRequested,
        GrantOptions::default(),
    );

    completes(h.manager.create_action(
        json!({
            "description": "buy ticket",
            "labels": ["tickets"],
            "outputs": [{"satoshis": 250, "basket": "tickets"}]
        }),
        APP,
    ))
    .await
    .unwrap();

    assert_eq!(basket.count(), 1);
    assert_eq!(protocol.count(), 1);
    assert_eq!(spending.count(), 1);
    assert_eq!(spending.last().info.proposed_amount, Some(250));
    assert_eq!(spending.last().info.reason.as_deref(), Some("buy ticket"));
    match &protocol.last().info.descriptor {
        PermissionDescriptor::Protocol { protocol, usage, .. } => {
            assert_eq!(protocol.name, "action label tickets");
            assert_eq!(*usage, ProtocolUsage::LabelApply);
        }
        other => panic!("unexpected descriptor {:?}", other),
    }
    assert_eq!(h.manager.spent_this_month(APP).await.unwrap(), 250);
}

#[tokio::test]
async fn test_audit_label_added_for_non_admin() {
    let h = harness_with_config(
        PermissionsConfig::new(ADMIN)
            .with_seek_permission_when_applying_action_labels(false)
            .with_seek_spending_permissions(false),
    );

    completes(h.manager.create_action(json!({"labels": ["rent"]}), APP))
        .await
        .unwrap();

    let calls = h.wallet.calls_to("create_action");
    assert_eq!(calls[0].args["labels"], json!(["rent", audit_label(APP)]));
}

#[tokio::test]
async fn test_sign_and_abort_need_no_permission() {
    let h = harness();
    completes(async {
        h.manager
            .sign_action(json!({"reference": "abc", "spends": {}}), APP)
            .await
            .unwrap();
        h.manager
            .abort_action(json!({"reference": "abc"}), APP)
            .await
            .unwrap();
    })
    .await;
}

#[tokio::test]
async fn test_identity_key_and_linkage_use_their_own_flags() {
    let config = PermissionsConfig::new(ADMIN)
        .with_seek_permissions_for_identity_key_revelation(false)
        .with_seek_permissions_for_key_linkage_revelation(false);
    let h = harness_with_config(config);

    completes(async {
        h.manager
            .get_public_key(json!({"identityKey": true}), APP)
            .await
            .unwrap();
        h.manager
            .reveal_counterparty_key_linkage(
                json!({"counterparty": "02peer", "verifier": "02verifier"}),
                APP,
            )
            .await
            .unwrap();
    })
    .await;

    // Derived public keys are still gated
    let collector = RequestCollector::new();
    collector.bind(&h.manager, PermissionEvent::ProtocolPermissionRequested);
    auto_deny(&h.manager, PermissionEvent::ProtocolPermissionRequested);
    let err = completes(h.manager.get_public_key(
        json!({"protocolID": [1, "chat"], "keyID": "1"}),
        APP,
    ))
    .await
    .unwrap_err();
    assert!(err.is_permission_denied());
    assert_eq!(collector.count(), 1);
}

#[tokio::test]
async fn test_certificate_protocols() {
    let h = harness();
    let collector = RequestCollector::new();
    collector.bind(&h.manager, PermissionEvent::ProtocolPermissionRequested);
    auto_grant(&h.manager, PermissionEvent::ProtocolPermissionRequested, GrantOptions::default());

    completes(async {
        h.manager
            .acquire_certificate(json!({"type": "identity", "certifier": "02c"}), APP)
            .await
            .unwrap();
        h.manager.list_certificates(json!({}), APP).await.unwrap();
        h.manager
            .discover_by_attributes(json!({"attributes": {"name": "Ann"}}), APP)
            .await
            .unwrap();
        // Same protocol as the previous call; token already minted
        h.manager
            .discover_by_identity_key(json!({"identityKey": "02x"}), APP)
            .await
            .unwrap();
    })
    .await;

    let names: Vec<String> = collector
        .requests()
        .iter()
        .filter_map(|request| match &request.info.descriptor {
            PermissionDescriptor::Protocol { protocol, .. } => Some(protocol.name.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(
        names,
        vec![
            "certificate acquisition identity",
            "certificate list",
            "identity resolution"
        ]
    );
}

// ===== Errors =====

#[tokio::test]
async fn test_wallet_errors_pass_through_unchanged() {
    let h = harness_with_config(
        PermissionsConfig::new(ADMIN).with_seek_protocol_permissions_for_hmac(false),
    );
    h.wallet.fail(
        "create_hmac",
        WalletError::new("ERR_KEY_LOCKED", "the key vault is locked"),
    );

    let err = completes(h.manager.create_hmac(
        json!({"protocolID": [2, "chat"], "keyID": "1", "data": [1]}),
        APP,
    ))
    .await
    .unwrap_err();

    let wallet_error = err.wallet_error().unwrap();
    assert_eq!(wallet_error.code, "ERR_KEY_LOCKED");
    assert_eq!(err.to_string(), "the key vault is locked");
}

#[tokio::test]
async fn test_malformed_args_rejected_before_forwarding() {
    let h = harness();

    let err = completes(h.manager.encrypt(json!({"keyID": "1"}), APP))
        .await
        .unwrap_err();
    assert!(err.is_invalid_request());

    let err = completes(h.manager.list_outputs(json!({"basket": ""}), APP))
        .await
        .unwrap_err();
    assert!(err.is_invalid_request());

    let err = completes(h.manager.prove_certificate(json!({"verifier": "02v"}), APP))
        .await
        .unwrap_err();
    assert!(err.is_invalid_request());

    assert_eq!(h.wallet.call_count(), 0);
}

// ===== Metadata encryption =====

#[tokio::test]
async fn test_metadata_round_trip() {
    let h = harness_with_config(
        PermissionsConfig::new(ADMIN)
            .with_seek_spending_permissions(false)
            .with_seek_permission_when_applying_action_labels(false)
            .with_seek_permission_when_listing_actions_by_label(false),
    );

    completes(h.manager.create_action(
        json!({"description": "hello", "labels": ["greetings"]}),
        APP,
    ))
    .await
    .unwrap();

    let stored = h.wallet.actions();
    assert_ne!(stored[0]["description"], "hello");

    let listed = completes(h.manager.list_actions(json!({"labels": ["greetings"]}), APP))
        .await
        .unwrap();
    assert_eq!(listed["actions"][0]["description"], "hello");

    // The admin sees exactly what is stored
    let raw = completes(h.manager.list_actions(json!({"labels": ["greetings"]}), ADMIN))
        .await
        .unwrap();
    assert_eq!(raw["actions"][0]["description"], stored[0]["description"]);
}

#[tokio::test]
async fn test_output_custom_instructions_encrypted() {
    let h =
        harness_with_config(PermissionsConfig::new(ADMIN).with_seek_spending_permissions(false));
    auto_grant(&h.manager, PermissionEvent::BasketAccessRequested, GrantOptions::default());

    completes(h.manager.create_action(
        json!({"outputs": [{
            "satoshis": 1,
            "basket": "notes",
            "customInstructions": "unlock with key 42"
        }]}),
        APP,
    ))
    .await
    .unwrap();
    assert_ne!(h.wallet.outputs()[0]["customInstructions"], "unlock with key 42");

    let listed = completes(h.manager.list_outputs(json!({"basket": "notes"}), APP))
        .await
        .unwrap();
    assert_eq!(listed["outputs"][0]["customInstructions"], "unlock with key 42");
}

#[tokio::test]
async fn test_metadata_left_plain_when_disabled() {
    let h = harness_with_config(
        PermissionsConfig::new(ADMIN)
            .with_encrypt_wallet_metadata(false)
            .with_seek_spending_permissions(false),
    );

    completes(h.manager.create_action(json!({"description": "hello"}), APP))
        .await
        .unwrap();
    assert_eq!(h.wallet.actions()[0]["description"], "hello");
    assert!(h.wallet.calls_to("encrypt").is_empty());
}
