use crate::helpers::{harness, running, settings, FakeTopology, Op};
use amqp_connector::amqp::BasicProperties;
use amqp_connector::connector::{
    ConnectorContext, EndpointDescriptor, OutboundMessage, ReturnProcessor, QUEUE_DURABLE,
};
use amqp_connector::transport::{Channel, ReturnedMessage};
use amqp_connector::{Connector, ConnectorError, ConnectorSettings};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

fn orders_endpoint() -> EndpointDescriptor {
    EndpointDescriptor::new("amqp://orders")
}

#[tokio::test]
async fn a_failing_action_invalidates_the_pooled_channel() {
    // Arrange
    let harness = running(settings(), FakeTopology::default()).await;

    // Act
    let outcome: Result<(), _> = harness
        .connector
        .run_with_pooled_channel(|member| async move {
            member.get_channel().await.unwrap();
            Err(anyhow::anyhow!("boom"))
        })
        .await;

    // Assert
    assert_eq!(outcome.unwrap_err().to_string(), "boom");
    assert_eq!(harness.connector.pool().idle_count(), 0);
    assert_eq!(harness.broker.open_channels(), 0);
}

#[tokio::test]
async fn a_successful_action_returns_the_channel_to_the_pool() {
    // Arrange
    let harness = running(settings(), FakeTopology::default()).await;

    // Act
    let channel_id = harness
        .connector
        .run_with_pooled_channel(|member| async move {
            let channel = member.get_channel().await.unwrap();
            Ok(channel.id())
        })
        .await
        .unwrap();

    // Assert
    assert_eq!(harness.connector.pool().idle_count(), 1);
    assert!(harness.broker.channel(channel_id).is_open());
}

#[tokio::test]
async fn running_an_action_while_disconnected_fails_to_borrow() {
    // Arrange
    let harness = harness(settings(), FakeTopology::default());

    // Act
    let outcome: Result<(), _> = harness
        .connector
        .run_with_pooled_channel(|_| async { Ok(()) })
        .await;

    // Assert
    let error = outcome.unwrap_err();
    assert!(matches!(
        error.downcast_ref::<ConnectorError>(),
        Some(ConnectorError::PoolExhausted(_))
    ));
}

#[tokio::test]
async fn inbound_endpoints_resolve_their_queue() {
    // Arrange
    let settings = ConnectorSettings {
        active_declarations_only: true,
        ..settings()
    };
    let topology = FakeTopology {
        queue_name: "orders".into(),
        ..FakeTopology::default()
    };
    let harness = running(settings, topology).await;

    // Act
    let binding = harness
        .connector
        .connect_inbound(&orders_endpoint())
        .await
        .unwrap();

    // Assert
    assert_eq!(binding.queue(), "orders");
    assert_eq!(
        harness.topology.declared_queues(),
        vec![(orders_endpoint(), true)]
    );
    // The receiver gets a dedicated channel, not the pooled one.
    let receiver_channel = binding.channel().get_channel().await.unwrap();
    let pooled = harness.connector.pool().borrow().await.unwrap();
    assert!(!pooled.same_as(binding.channel()));
    assert_ne!(
        pooled.get_channel().await.unwrap().id(),
        receiver_channel.id()
    );
}

#[tokio::test]
async fn inbound_failures_name_the_endpoint() {
    // Arrange
    let topology = FakeTopology {
        fail: true,
        ..FakeTopology::default()
    };
    let harness = running(settings(), topology).await;

    // Act
    let error = harness
        .connector
        .connect_inbound(&orders_endpoint())
        .await
        .unwrap_err();

    // Assert
    assert!(matches!(error, ConnectorError::Connect { .. }));
    assert_eq!(
        error.to_string(),
        "Error when connecting inbound endpoint: amqp://orders"
    );
    assert_eq!(harness.connector.pool().idle_count(), 0);
}

#[tokio::test]
async fn outbound_endpoints_without_exchange_route_to_their_queue() {
    // Arrange
    let topology = FakeTopology {
        queue_name: "orders".into(),
        ..FakeTopology::default()
    };
    let harness = running(settings(), topology).await;

    // Act
    let binding = harness
        .connector
        .connect_outbound(&orders_endpoint())
        .await
        .unwrap();

    // Assert
    assert_eq!(binding.exchange(), "");
    assert_eq!(binding.routing_key(), "orders");
    assert_eq!(harness.topology.declared_queues().len(), 1);
    assert_eq!(harness.topology.declared_exchanges().len(), 1);
}

#[tokio::test]
async fn outbound_endpoints_keep_their_exchange_and_routing_key() {
    // Arrange
    let topology = FakeTopology {
        exchange: "events".into(),
        routing_key: "order.created".into(),
        ..FakeTopology::default()
    };
    let harness = running(settings(), topology).await;

    // Act
    let binding = harness
        .connector
        .connect_outbound(&orders_endpoint())
        .await
        .unwrap();

    // Assert
    assert_eq!(binding.exchange(), "events");
    assert_eq!(binding.routing_key(), "order.created");
    assert!(harness.topology.declared_queues().is_empty());
}

#[tokio::test]
async fn outbound_endpoints_with_queue_properties_declare_the_queue() {
    // Arrange
    let topology = FakeTopology {
        exchange: "events".into(),
        ..FakeTopology::default()
    };
    let harness = running(settings(), topology).await;
    let endpoint = orders_endpoint().with_property(QUEUE_DURABLE, "true");

    // Act
    harness.connector.connect_outbound(&endpoint).await.unwrap();

    // Assert
    assert_eq!(harness.topology.declared_queues(), vec![(endpoint, false)]);
}

#[tokio::test]
async fn outbound_failures_name_the_endpoint() {
    // Arrange
    let topology = FakeTopology {
        fail: true,
        ..FakeTopology::default()
    };
    let harness = running(settings(), topology).await;

    // Act
    let error = harness
        .connector
        .connect_outbound(&orders_endpoint())
        .await
        .unwrap_err();

    // Assert
    assert_eq!(
        error.to_string(),
        "Error when connecting outbound endpoint: amqp://orders"
    );
}

#[tokio::test]
async fn reconnecting_discards_pooled_channels() {
    // Arrange
    let harness = running(settings(), FakeTopology::default()).await;
    let pool = harness.connector.pool();
    let member = pool.borrow().await.unwrap();
    let channel = member.get_channel().await.unwrap();
    pool.return_(member).await;

    // Act
    harness.connector.connect().await.unwrap();

    // Assert
    assert_eq!(pool.idle_count(), 0);
    assert!(!channel.is_open());
}

#[tokio::test]
async fn disconnecting_stops_the_connector() {
    // Arrange
    let harness = running(settings(), FakeTopology::default()).await;

    // Act
    harness.connector.disconnect().await.unwrap();

    // Assert
    assert!(!harness.connector.is_started());
    assert!(!harness.connector.connection().is_connected());
}

#[tokio::test]
async fn publishing_applies_the_connector_defaults() {
    // Arrange
    let settings = ConnectorSettings {
        mandatory: true,
        priority: 3,
        ..settings()
    };
    let topology = FakeTopology {
        exchange: "events".into(),
        routing_key: "order.created".into(),
        ..FakeTopology::default()
    };
    let harness = running(settings, topology).await;
    let binding = harness
        .connector
        .connect_outbound(&orders_endpoint())
        .await
        .unwrap();

    // Act
    harness
        .connector
        .publish(
            &binding,
            OutboundMessage {
                payload: b"order #1".to_vec(),
                properties: BasicProperties::default(),
            },
        )
        .await
        .unwrap();
    harness
        .connector
        .publish(
            &binding,
            OutboundMessage {
                payload: b"order #2".to_vec(),
                properties: BasicProperties::default()
                    .with_delivery_mode(1)
                    .with_priority(9),
            },
        )
        .await
        .unwrap();

    // Assert
    let channel_id = binding.channel().get_channel().await.unwrap().id();
    let published: Vec<_> = harness
        .broker
        .channel(channel_id)
        .operations()
        .into_iter()
        .filter_map(|op| match op {
            Op::Publish {
                exchange,
                routing_key,
                options,
                properties,
                payload,
            } => Some((exchange, routing_key, options, properties, payload)),
            _ => None,
        })
        .collect();
    assert_eq!(published.len(), 2);

    let (exchange, routing_key, options, properties, payload) = &published[0];
    assert_eq!(exchange, "events");
    assert_eq!(routing_key, "order.created");
    assert!(options.mandatory);
    assert!(!options.immediate);
    assert_eq!(payload, b"order #1");
    assert_eq!(*properties.delivery_mode(), Some(2));
    assert_eq!(*properties.priority(), Some(3));
    assert!(properties.message_id().is_some());
    assert!(properties.timestamp().is_some());

    let (_, _, _, properties, _) = &published[1];
    assert_eq!(*properties.delivery_mode(), Some(1));
    assert_eq!(*properties.priority(), Some(9));
}

struct ForwardingProcessor(mpsc::UnboundedSender<(ConnectorContext, ReturnedMessage)>);

#[async_trait::async_trait]
impl ReturnProcessor for ForwardingProcessor {
    async fn process(
        &self,
        context: &ConnectorContext,
        message: ReturnedMessage,
    ) -> Result<(), anyhow::Error> {
        self.0.send((context.clone(), message))?;
        Ok(())
    }
}

#[tokio::test]
async fn returned_messages_reach_the_default_return_processor() {
    // Arrange
    let broker = crate::helpers::FakeBroker::new();
    let (sender, mut receiver) = mpsc::unbounded_channel();
    let connector = Connector::builder(settings(), Arc::new(FakeTopology::default()))
        .with_transport(broker.clone())
        .with_default_return_processor(ForwardingProcessor(sender))
        .build()
        .unwrap();
    connector.connect().await.unwrap();
    connector.start();
    let channel = connector.managed_channel().get_channel().await.unwrap();
    let returned = ReturnedMessage {
        reply_code: 312,
        reply_text: "NO_ROUTE".into(),
        exchange: "events".into(),
        routing_key: "nobody.listens".into(),
        properties: BasicProperties::default(),
        data: b"lost".to_vec(),
    };

    // Act
    broker.channel(channel.id()).simulate_return(returned.clone());

    // Assert
    let (context, message) = tokio::time::timeout(Duration::from_secs(1), receiver.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(context.connector_name, "test-connector");
    assert_eq!(message, returned);
}

#[test]
fn building_without_a_transport_uses_the_settings() {
    let connector = Connector::builder(settings(), Arc::new(FakeTopology::default())).build();

    let connector = connector.unwrap();
    assert_eq!(connector.name(), "test-connector");
    assert!(!connector.connection().is_connected());
}
