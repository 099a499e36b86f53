use super::*;
use crate::deployment::instance::InstanceClass;

async fn temp_db() -> DbClient {
    let tempdir = tempfile::tempdir().expect("tempdir");
    let db_path = tempdir.path().join("deploy-agent.db");
    // Leaked so the file outlives any pool connection still open at test end.
    std::mem::forget(tempdir);

    DbClient::initialize(&db_path.to_string_lossy())
        .await
        .expect("db init")
}

async fn seed_user(db: &DbClient, id: &str) {
    db.insert_user(&NewUser {
        id: id.to_string(),
        username: format!("user-{id}"),
        password_hash: "hash".to_string(),
        role: "developer".to_string(),
    })
    .await
    .expect("insert user");
}

fn link(owner_id: &str, instance_name: &str, class: InstanceClass, branch: &str) -> RepositoryLinkUpsert {
    RepositoryLinkUpsert {
        id: format!("link-{owner_id}-{instance_name}"),
        owner_id: owner_id.to_string(),
        instance_name: instance_name.to_string(),
        instance_class: class,
        remote_owner: "acme".to_string(),
        remote_repo: "addons".to_string(),
        target_branch: branch.to_string(),
        local_path: format!("/opt/odoo/{instance_name}/custom_addons"),
        github_username: Some("octocat".to_string()),
        access_credential_encrypted: Some("ciphertext".to_string()),
        auto_deploy_enabled: false,
        run_module_update_on_deploy: false,
    }
}

#[tokio::test]
async fn initialize_runs_migrations_and_enables_wal() {
    let db = temp_db().await;
    db.ensure_wal_mode().await.expect("wal mode");
    assert_eq!(db.users_count().await.expect("count"), 0);
}

#[tokio::test]
async fn users_are_found_by_name_and_id() {
    let db = temp_db().await;
    seed_user(&db, "u1").await;

    let by_name = db
        .find_user_by_username("user-u1")
        .await
        .expect("lookup")
        .expect("user exists");
    assert_eq!(by_name.id, "u1");
    assert_eq!(by_name.role, "developer");

    assert!(db.find_user_by_id("u1").await.expect("lookup").is_some());
    assert!(db.find_user_by_id("missing").await.expect("lookup").is_none());
    assert_eq!(db.users_count().await.expect("count"), 1);
}

#[tokio::test]
async fn production_links_are_pinned_to_main() {
    let db = temp_db().await;
    seed_user(&db, "u1").await;

    let record = db
        .upsert_repository_link(&link("u1", "shop", InstanceClass::Production, "feature"))
        .await
        .expect("upsert");

    assert_eq!(record.target_branch, "main");
    assert_eq!(record.class(), InstanceClass::Production);
    assert!(record.active);
    assert!(record.webhook_secret.is_none());
}

#[tokio::test]
async fn upsert_refreshes_the_existing_link_for_the_same_instance() {
    let db = temp_db().await;
    seed_user(&db, "u1").await;

    let first = db
        .upsert_repository_link(&link("u1", "dev-shop", InstanceClass::Development, "dev-shop"))
        .await
        .expect("first upsert");

    let mut changed = link("u1", "dev-shop", InstanceClass::Development, "staging");
    changed.id = "ignored-new-id".to_string();
    let second = db.upsert_repository_link(&changed).await.expect("second upsert");

    assert_eq!(second.id, first.id);
    assert_eq!(second.target_branch, "staging");
    assert_eq!(db.list_repository_links("u1").await.expect("list").len(), 1);
}

#[tokio::test]
async fn deactivated_links_disappear_from_active_queries() {
    let db = temp_db().await;
    seed_user(&db, "u1").await;
    db.upsert_repository_link(&link("u1", "shop", InstanceClass::Production, "main"))
        .await
        .expect("upsert");

    assert!(db.deactivate_repository_link("u1", "shop").await.expect("deactivate"));
    assert!(!db.deactivate_repository_link("u1", "shop").await.expect("second deactivate"));

    assert!(db
        .get_active_repository_link("u1", "shop")
        .await
        .expect("lookup")
        .is_none());
    assert!(db
        .get_repository_link("u1", "shop")
        .await
        .expect("lookup")
        .is_some());
    assert!(db.list_repository_links("u1").await.expect("list").is_empty());
}

#[tokio::test]
async fn reset_drops_credentials_and_reconfigure_reactivates() {
    let db = temp_db().await;
    seed_user(&db, "u1").await;
    db.upsert_repository_link(&link("u1", "shop", InstanceClass::Production, "main"))
        .await
        .expect("upsert");

    let reset = db
        .reset_repository_link("u1", "shop")
        .await
        .expect("reset")
        .expect("link exists");
    assert!(!reset.active);
    assert!(reset.access_credential_encrypted.is_none());
    assert!(reset.github_username.is_none());
    assert_eq!(reset.remote_repo, "addons");

    let reconfigured = db
        .reconfigure_repository_link(
            "u1",
            "shop",
            &RepositoryLinkReconfigure {
                github_username: "hubot".to_string(),
                access_credential_encrypted: "new-ciphertext".to_string(),
                remote_repo: Some("addons-v2".to_string()),
                target_branch: Some("feature".to_string()),
                ..RepositoryLinkReconfigure::default()
            },
        )
        .await
        .expect("reconfigure")
        .expect("link exists");

    assert!(reconfigured.active);
    assert_eq!(reconfigured.github_username.as_deref(), Some("hubot"));
    assert_eq!(
        reconfigured.access_credential_encrypted.as_deref(),
        Some("new-ciphertext")
    );
    assert_eq!(reconfigured.remote_repo, "addons-v2");
    assert_eq!(reconfigured.remote_owner, "acme");
    assert_eq!(reconfigured.target_branch, "main");

    assert!(db
        .reset_repository_link("u1", "missing")
        .await
        .expect("reset")
        .is_none());
}

#[tokio::test]
async fn configure_webhook_keeps_the_first_secret() {
    let db = temp_db().await;
    seed_user(&db, "u1").await;
    db.upsert_repository_link(&link("u1", "dev-shop", InstanceClass::Development, "dev-shop"))
        .await
        .expect("upsert");

    let first = db
        .configure_webhook("u1", "dev-shop", "secret-one", true, false)
        .await
        .expect("configure")
        .expect("link exists");
    assert_eq!(first.webhook_secret.as_deref(), Some("secret-one"));
    assert!(first.auto_deploy_enabled);

    let second = db
        .configure_webhook("u1", "dev-shop", "secret-two", true, true)
        .await
        .expect("configure")
        .expect("link exists");
    assert_eq!(second.webhook_secret.as_deref(), Some("secret-one"));
    assert!(second.run_module_update_on_deploy);

    // Re-linking leaves the secret alone.
    let relinked = db
        .upsert_repository_link(&link("u1", "dev-shop", InstanceClass::Development, "dev-shop"))
        .await
        .expect("upsert");
    assert_eq!(relinked.webhook_secret.as_deref(), Some("secret-one"));
}

#[tokio::test]
async fn auto_deploy_links_span_owners() {
    let db = temp_db().await;
    seed_user(&db, "u1").await;
    seed_user(&db, "u2").await;

    for owner in ["u1", "u2"] {
        db.upsert_repository_link(&link(owner, "shop", InstanceClass::Production, "main"))
            .await
            .expect("upsert");
    }
    db.configure_webhook("u1", "shop", "s1", true, false)
        .await
        .expect("configure");
    db.configure_webhook("u2", "shop", "s2", false, false)
        .await
        .expect("configure");

    let candidates = db.list_auto_deploy_links("shop").await.expect("list");
    assert_eq!(candidates.len(), 1);
    assert_eq!(candidates[0].owner_id, "u1");

    assert!(db
        .list_auto_deploy_links("other")
        .await
        .expect("list")
        .is_empty());
}

#[tokio::test]
async fn record_deploy_success_stamps_the_link() {
    let db = temp_db().await;
    seed_user(&db, "u1").await;
    let record = db
        .upsert_repository_link(&link("u1", "shop", InstanceClass::Production, "main"))
        .await
        .expect("upsert");
    assert!(record.last_deploy_at.is_none());

    let stamped_at = db.record_deploy_success(&record.id).await.expect("stamp");
    let reloaded = db
        .get_repository_link("u1", "shop")
        .await
        .expect("lookup")
        .expect("link exists");
    assert_eq!(reloaded.last_deploy_at.as_deref(), Some(stamped_at.as_str()));
}

#[tokio::test]
async fn action_logs_are_listed_newest_first_and_capped() {
    let db = temp_db().await;
    seed_user(&db, "u1").await;

    for index in 0..3 {
        db.insert_action_log(&NewActionLog {
            id: format!("log-{index}"),
            owner_id: "u1".to_string(),
            action: "deploy".to_string(),
            instance_name: "shop".to_string(),
            details: format!("attempt {index}"),
            status: if index == 1 { "error" } else { "success" }.to_string(),
        })
        .await
        .expect("insert log");
    }

    let logs = db.list_action_logs("u1", "shop", 10).await.expect("list");
    let ids: Vec<&str> = logs.iter().map(|entry| entry.id.as_str()).collect();
    assert_eq!(ids, vec!["log-2", "log-1", "log-0"]);
    assert_eq!(logs[1].status, "error");

    assert_eq!(db.list_action_logs("u1", "shop", 0).await.expect("list").len(), 1);
    assert!(db
        .list_action_logs("u1", "other", 10)
        .await
        .expect("list")
        .is_empty());
}
