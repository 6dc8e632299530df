use crate::helpers::{running, settings, FakeTopology, Harness, Op};
use amqp_connector::transaction::{AmqpTransaction, RecoverStrategy, TransactionState};
use amqp_connector::transport::Channel;
use amqp_connector::TransactionError;
use std::sync::atomic::Ordering;
use std::sync::Arc;

async fn transactional_channel() -> (Harness, Arc<dyn Channel>) {
    let harness = running(settings(), FakeTopology::default()).await;
    let channel = harness
        .connector
        .managed_channel()
        .get_channel()
        .await
        .unwrap();
    channel.tx_select().await.unwrap();
    (harness, channel)
}

fn transaction_operations(harness: &Harness, channel: &Arc<dyn Channel>) -> Vec<Op> {
    harness
        .broker
        .channel(channel.id())
        .operations()
        .into_iter()
        .filter(|op| {
            matches!(
                op,
                Op::TxCommit | Op::TxRollback | Op::Recover { .. }
            )
        })
        .collect()
}

#[test]
fn only_channels_can_be_bound() {
    let mut transaction = AmqpTransaction::new(RecoverStrategy::None);

    let error = transaction
        .bind_resource("connector", String::from("not a channel"))
        .unwrap_err();

    assert!(matches!(error, TransactionError::IllegalResourceType(_)));
    assert!(error.to_string().contains("alloc::string::String"));
    assert!(!transaction.has_resource());
}

#[tokio::test]
async fn a_second_resource_is_rejected() {
    // Arrange
    let (_harness, channel) = transactional_channel().await;
    let mut transaction = AmqpTransaction::new(RecoverStrategy::None);
    transaction
        .bind_resource("connector", Arc::clone(&channel))
        .unwrap();

    // Act
    let error = transaction
        .bind_resource("other", Arc::clone(&channel))
        .unwrap_err();

    // Assert
    assert!(matches!(error, TransactionError::AlreadyBound(key) if key == "connector"));
}

#[tokio::test]
async fn completing_without_a_resource_is_a_no_op() {
    let mut committed = AmqpTransaction::new(RecoverStrategy::Requeue);
    committed.begin();
    committed.commit().await.unwrap();
    assert_eq!(committed.state(), TransactionState::Committed);

    let mut rolled_back = AmqpTransaction::new(RecoverStrategy::Requeue);
    rolled_back.rollback().await.unwrap();
    assert_eq!(rolled_back.state(), TransactionState::RolledBack);
}

#[tokio::test]
async fn commit_commits_the_bound_channel() {
    // Arrange
    let (harness, channel) = transactional_channel().await;
    let mut transaction = AmqpTransaction::new(RecoverStrategy::Requeue);
    transaction
        .bind_resource("connector", Arc::clone(&channel))
        .unwrap();

    // Act
    transaction.commit().await.unwrap();

    // Assert
    assert_eq!(transaction.state(), TransactionState::Committed);
    assert_eq!(transaction_operations(&harness, &channel), vec![Op::TxCommit]);
}

#[tokio::test]
async fn commit_failures_are_surfaced() {
    // Arrange
    let (harness, channel) = transactional_channel().await;
    harness.broker.failures.commit.store(true, Ordering::SeqCst);
    let mut transaction = AmqpTransaction::new(RecoverStrategy::None);
    transaction
        .bind_resource("connector", Arc::clone(&channel))
        .unwrap();

    // Act
    let error = transaction.commit().await.unwrap_err();

    // Assert
    assert!(matches!(error, TransactionError::CommitFailed(_)));
    assert_eq!(transaction.state(), TransactionState::Begun);
}

#[tokio::test]
async fn rollback_recovers_according_to_the_strategy() {
    for (strategy, expected) in [
        (RecoverStrategy::None, vec![Op::TxRollback]),
        (
            RecoverStrategy::NoRequeue,
            vec![Op::TxRollback, Op::Recover { requeue: false }],
        ),
        (
            RecoverStrategy::Requeue,
            vec![Op::TxRollback, Op::Recover { requeue: true }],
        ),
    ] {
        // Arrange
        let (harness, channel) = transactional_channel().await;
        let mut transaction = AmqpTransaction::new(strategy);
        transaction
            .bind_resource("connector", Arc::clone(&channel))
            .unwrap();

        // Act
        transaction.rollback().await.unwrap();

        // Assert
        assert_eq!(transaction.state(), TransactionState::RolledBack);
        assert_eq!(
            transaction_operations(&harness, &channel),
            expected,
            "strategy: {strategy}"
        );
    }
}

#[tokio::test]
async fn a_failed_recovery_does_not_fail_the_rollback() {
    // Arrange
    let (harness, channel) = transactional_channel().await;
    harness.broker.failures.recover.store(true, Ordering::SeqCst);
    let mut transaction = AmqpTransaction::new(RecoverStrategy::Requeue);
    transaction
        .bind_resource("connector", Arc::clone(&channel))
        .unwrap();

    // Act
    transaction.rollback().await.unwrap();

    // Assert
    assert_eq!(transaction.state(), TransactionState::RolledBack);
    assert_eq!(
        transaction_operations(&harness, &channel),
        vec![Op::TxRollback, Op::Recover { requeue: true }]
    );
}

#[tokio::test]
async fn a_failed_rollback_skips_recovery() {
    // Arrange
    let (harness, channel) = transactional_channel().await;
    harness.broker.failures.rollback.store(true, Ordering::SeqCst);
    let mut transaction = AmqpTransaction::new(RecoverStrategy::Requeue);
    transaction
        .bind_resource("connector", Arc::clone(&channel))
        .unwrap();

    // Act
    let error = transaction.rollback().await.unwrap_err();

    // Assert
    assert!(matches!(error, TransactionError::RollbackFailed(_)));
    assert_eq!(transaction_operations(&harness, &channel), vec![Op::TxRollback]);
}

#[tokio::test]
async fn a_completed_transaction_cannot_complete_again() {
    // Arrange
    let (_harness, channel) = transactional_channel().await;
    let mut transaction = AmqpTransaction::new(RecoverStrategy::None);
    transaction.bind_resource("connector", channel).unwrap();
    transaction.commit().await.unwrap();

    // Act
    let commit_again = transaction.commit().await.unwrap_err();
    let rollback_after_commit = transaction.rollback().await.unwrap_err();

    // Assert
    assert_eq!(
        commit_again.to_string(),
        "The transaction has already been committed"
    );
    assert!(matches!(
        rollback_after_commit,
        TransactionError::AlreadyCompleted("committed")
    ));
}

#[tokio::test]
async fn a_concrete_channel_binds_once_coerced() {
    // Arrange
    let (harness, channel) = transactional_channel().await;
    let concrete = harness.broker.channel(channel.id());
    let mut transaction = AmqpTransaction::new(RecoverStrategy::None);

    // Act
    let uncoerced = transaction.bind_resource("connector", Arc::clone(&concrete));
    transaction.bind_channel("connector", concrete).unwrap();
    transaction.commit().await.unwrap();

    // Assert
    assert!(matches!(
        uncoerced,
        Err(TransactionError::IllegalResourceType(_))
    ));
    assert_eq!(transaction_operations(&harness, &channel), vec![Op::TxCommit]);
}
