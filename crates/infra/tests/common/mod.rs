#![allow(dead_code)]

use std::sync::Arc;

use chrono::Utc;

use fabline_catalog::{ItemQuantity, PieceKind, PrintJob, Product, ProductNode, ProductType};
use fabline_core::{LocationId, OrderId, ProductId, StockPositionId};
use fabline_events::{EventBus, InMemoryEventBus, Subscription};
use fabline_infra::{
    Collection, Document, DocumentStore, DrainReport, EngineConfig, EventTrigger,
    InMemoryDocumentStore, PublishingDocumentStore, Query, Transaction, WorkflowExecutor, drain,
};
use fabline_inventory::StockPosition;
use fabline_orders::Order;
use fabline_production::{AssemblyGroup, GroupKind, ProductionEventRecord};

pub type Bus = Arc<InMemoryEventBus<EventTrigger>>;
pub type Store = PublishingDocumentStore<Arc<InMemoryDocumentStore>, Bus>;

/// In-memory store + trigger bus + executor, drained on the test thread.
pub struct Harness {
    pub executor: WorkflowExecutor<Store>,
    pub memory: Arc<InMemoryDocumentStore>,
    pub bus: Bus,
    pub sub: Subscription<EventTrigger>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        fabline_observability::init_for_tests();
        let memory = Arc::new(InMemoryDocumentStore::new());
        let bus: Bus = Arc::new(InMemoryEventBus::new());
        let sub = bus.subscribe();
        let store = PublishingDocumentStore::new(memory.clone(), bus.clone());
        Self {
            executor: WorkflowExecutor::new(store, config),
            memory,
            bus,
            sub,
        }
    }

    pub fn drain(&self) -> DrainReport {
        drain(&self.executor, &self.sub)
    }

    /// Submit an order and run its pipeline until no triggers are pending.
    pub fn place(&self, number: u64, products: Vec<ProductNode>) -> anyhow::Result<OrderId> {
        let order = Order::new(OrderId::new(), number, products, Utc::now());
        self.executor.submit_order(&order)?;
        let report = self.drain();
        anyhow::ensure!(report.is_clean(), "pipeline failed: {:?}", report.failures);
        Ok(order.id)
    }

    pub fn all<D: Document>(&self) -> anyhow::Result<Vec<D>> {
        let found = self.memory.query(&Query::new(D::COLLECTION))?;
        Ok(found.iter().map(|d| d.decode()).collect::<Result<_, _>>()?)
    }

    pub fn groups(&self, kind: GroupKind) -> anyhow::Result<Vec<AssemblyGroup>> {
        Ok(self.all::<AssemblyGroup>()?.into_iter().filter(|g| g.kind == kind).collect())
    }

    pub fn order(&self, id: OrderId) -> anyhow::Result<Order> {
        let mut tx = Transaction::new(self.memory.as_ref());
        Ok(tx.require(&id.to_string())?)
    }

    pub fn events_of(&self, kind: &str) -> anyhow::Result<Vec<ProductionEventRecord>> {
        Ok(self.all::<ProductionEventRecord>()?.into_iter().filter(|e| e.kind == kind).collect())
    }

    /// Write collaborator-owned documents (catalog, stock positions).
    pub fn seed<D: Document>(&self, documents: &[D]) -> anyhow::Result<()> {
        let mut tx = Transaction::new(self.memory.as_ref());
        for document in documents {
            tx.put(document)?;
        }
        self.memory.commit(tx.into_commit())?;
        Ok(())
    }

    pub fn count(&self, collection: Collection) -> anyhow::Result<usize> {
        Ok(self.memory.count(collection)?)
    }
}

pub fn pid(s: &str) -> ProductId {
    ProductId::new(s).unwrap()
}

pub fn piece(id: &str, quantity: u32, kind: PieceKind, cap: Option<u32>) -> ProductNode {
    let jobs = match kind {
        PieceKind::CompositeMultiPrint => vec![
            PrintJob {
                parts: vec![ItemQuantity::new(pid(&format!("{id}-top")), "Top", 1)],
                filaments: vec![ItemQuantity::new(pid("pla"), "PLA", 8)],
                supplies: vec![],
                print_minutes: 20,
                max_batch_size: cap,
            },
            PrintJob {
                parts: vec![ItemQuantity::new(pid(&format!("{id}-base")), "Base", 1)],
                filaments: vec![ItemQuantity::new(pid("pla"), "PLA", 12)],
                supplies: vec![],
                print_minutes: 25,
                max_batch_size: cap,
            },
        ],
        _ => vec![PrintJob {
            parts: vec![ItemQuantity::new(pid(&format!("{id}-body")), "Body", 1)],
            filaments: vec![ItemQuantity::new(pid("pla"), "PLA", 10)],
            supplies: vec![],
            print_minutes: 30,
            max_batch_size: cap,
        }],
    };
    ProductNode {
        product_id: pid(id),
        product_type: ProductType::Piece,
        name: format!("Piece {id}"),
        quantity,
        piece_kind: Some(kind),
        print_jobs: jobs,
        components: vec![],
    }
}

pub fn model(id: &str, quantity: u32, pieces: Vec<ProductNode>) -> ProductNode {
    ProductNode {
        product_id: pid(id),
        product_type: ProductType::Model,
        name: format!("Model {id}"),
        quantity,
        piece_kind: None,
        print_jobs: vec![],
        components: pieces,
    }
}

pub fn kit(id: &str, quantity: u32, components: Vec<ProductNode>) -> ProductNode {
    ProductNode {
        product_id: pid(id),
        product_type: ProductType::Kit,
        name: format!("Kit {id}"),
        quantity,
        piece_kind: None,
        print_jobs: vec![],
        components,
    }
}

pub fn catalog_product(id: &str, product_type: ProductType) -> Product {
    Product {
        id: pid(id),
        product_type,
        name: id.to_string(),
        sku: None,
        piece_kind: None,
        components: vec![],
    }
}

pub fn position(id: &str, product: &str, product_type: ProductType, on_hand: i64) -> StockPosition {
    StockPosition {
        id: StockPositionId::new(id).unwrap(),
        product_id: pid(product),
        product_type,
        location_id: LocationId::new("main").unwrap(),
        quantity: on_hand,
    }
}
