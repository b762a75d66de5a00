//! BOM explosion: order product trees into instances, groups and print demand.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};

use fabline_catalog::{PieceKind, PrintJob, ProductNode, ProductType};
use fabline_core::{DomainResult, OrderId, ProductId};
use fabline_orders::Order;

use crate::batch::CompositionKey;
use crate::group::{AssemblyGroup, GroupKind, RequiredComponent, RequiredProduct};
use crate::identifier::{AssemblyInstance, InstancePath, PathStep};

/// One unit of print work owed to one instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrintDemand {
    pub key: CompositionKey,
    pub job: PrintJob,
    pub piece_kind: PieceKind,
    pub order_id: OrderId,
    pub order_number: u64,
    pub instance: InstancePath,
    pub units: u32,
}

/// Everything derived from one order's product selection.
#[derive(Debug, Clone)]
pub struct Explosion {
    /// One instance per unit of every node, depth-first. Part instances hang
    /// under their piece; the piece group's ledger tracks their arrival.
    pub instances: Vec<AssemblyInstance>,
    pub groups: Vec<AssemblyGroup>,
    pub packaging: AssemblyGroup,
    pub demands: Vec<PrintDemand>,
}

/// Explode an order. Validates the whole product snapshot first, so a
/// malformed order yields an error before anything is derived.
pub fn explode(order: &Order, now: DateTime<Utc>) -> DomainResult<Explosion> {
    order.validate_for_explosion()?;

    let mut walker = Walker {
        order,
        now,
        instances: Vec::new(),
        groups: Vec::new(),
        demands: Vec::new(),
    };
    walker.visit_level(&order.products, None);

    let top_level: Vec<&AssemblyInstance> = walker
        .instances
        .iter()
        .filter(|i| i.path.is_top_level())
        .collect();
    let tree = packaging_entries(&walker.instances, top_level);
    let packaging = AssemblyGroup::packaging(order.id, order.number, tree, now);

    Ok(Explosion {
        instances: walker.instances,
        groups: walker.groups,
        packaging,
        demands: walker.demands,
    })
}

/// The instance set of an order, without groups or demand.
pub fn instances_of(order: &Order) -> DomainResult<Vec<AssemblyInstance>> {
    Ok(explode(order, Utc::now())?.instances)
}

struct Walker<'a> {
    order: &'a Order,
    now: DateTime<Utc>,
    instances: Vec<AssemblyInstance>,
    groups: Vec<AssemblyGroup>,
    demands: Vec<PrintDemand>,
}

impl<'a> Walker<'a> {
    fn visit_level(&mut self, nodes: &'a [ProductNode], parent: Option<&InstancePath>) {
        // Repeated siblings of the same product continue one index sequence.
        let mut next_index: HashMap<(&ProductId, ProductType), u32> = HashMap::new();
        for node in nodes {
            let counter = next_index
                .entry((&node.product_id, node.product_type))
                .or_insert(0);
            for _ in 0..node.quantity {
                *counter += 1;
                let step = PathStep::new(node.product_id.clone(), node.product_type, *counter);
                let path = match parent {
                    Some(p) => p.child(step),
                    None => InstancePath::root(self.order.id, step),
                };
                self.visit(node, path);
            }
        }
    }

    fn visit(&mut self, node: &'a ProductNode, path: InstancePath) {
        let instance = AssemblyInstance::from_path(path.clone(), node.name.clone());

        if node.requires_assembly() {
            if let Some(kind) = GroupKind::for_product(node.product_type) {
                self.groups.push(AssemblyGroup::for_instance(
                    kind,
                    self.order.number,
                    &instance,
                    required_components(node),
                    self.now,
                ));
            }
        }

        if node.product_type == ProductType::Piece {
            let piece_kind = node.piece_kind.unwrap_or(PieceKind::Simple);
            for job in &node.print_jobs {
                self.demands.push(PrintDemand {
                    key: CompositionKey::of(job, piece_kind),
                    job: job.clone(),
                    piece_kind,
                    order_id: self.order.id,
                    order_number: self.order.number,
                    instance: path.clone(),
                    units: 1,
                });
            }
        }

        self.instances.push(instance);
        self.visit_level(&node.components, Some(&path));
    }
}

/// Component list seeded on a new group, one line per distinct product.
fn required_components(node: &ProductNode) -> Vec<RequiredComponent> {
    let mut lines: Vec<RequiredComponent> = Vec::new();
    let mut add = |id: &ProductId, product_type: ProductType, name: &str, quantity: u32| {
        match lines
            .iter_mut()
            .find(|l| &l.product_id == id && l.product_type == product_type)
        {
            Some(line) => line.quantity = line.quantity.saturating_add(quantity),
            None => lines.push(RequiredComponent::new(id.clone(), product_type, name, quantity)),
        }
    };

    match node.product_type {
        ProductType::Piece => {
            let declared: Vec<&ProductNode> = node.components_of(ProductType::Part).collect();
            if declared.is_empty() {
                for item in node.print_jobs.iter().flat_map(|j| &j.parts) {
                    let quantity = u32::try_from(item.quantity).unwrap_or(u32::MAX);
                    add(&item.id, ProductType::Part, item.name.as_str(), quantity);
                }
            } else {
                for part in declared {
                    add(&part.product_id, ProductType::Part, part.name.as_str(), part.quantity);
                }
            }
        }
        _ => {
            for child in node.components.iter().filter(|c| c.product_type != ProductType::Part) {
                add(&child.product_id, child.product_type, child.name.as_str(), child.quantity);
            }
        }
    }
    lines
}

/// Packaging tree for a set of sibling instances, grouped by product.
fn packaging_entries(all: &[AssemblyInstance], members: Vec<&AssemblyInstance>) -> Vec<RequiredProduct> {
    let mut grouped: Vec<Vec<&AssemblyInstance>> = Vec::new();
    for instance in members {
        match grouped.iter_mut().find(|g| {
            g[0].product_id() == instance.product_id() && g[0].product_type() == instance.product_type()
        }) {
            Some(group) => group.push(instance),
            None => grouped.push(vec![instance]),
        }
    }

    grouped
        .into_iter()
        .map(|group| {
            let parents: HashSet<&InstancePath> = group.iter().map(|i| &i.path).collect();
            let children: Vec<&AssemblyInstance> = all
                .iter()
                .filter(|i| i.product_type() != ProductType::Part)
                .filter(|i| i.path.parent().is_some_and(|p| parents.contains(&p)))
                .collect();
            let first = group[0];
            RequiredProduct {
                product_id: first.product_id().clone(),
                product_type: first.product_type(),
                name: first.name.clone(),
                quantity: u32::try_from(group.len()).unwrap_or(u32::MAX),
                instance_ids: group.iter().map(|i| i.id.clone()).collect(),
                ledger: Default::default(),
                children: packaging_entries(all, children),
            }
        })
        .collect()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use fabline_catalog::ItemQuantity;

    fn pid(s: &str) -> ProductId {
        ProductId::new(s).unwrap()
    }

    pub(crate) fn piece_node(id: &str, quantity: u32, kind: PieceKind, cap: Option<u32>) -> ProductNode {
        let jobs = match kind {
            PieceKind::CompositeMultiPrint => vec![
                PrintJob {
                    parts: vec![ItemQuantity::new(pid("part-top"), "Top", 1)],
                    filaments: vec![ItemQuantity::new(pid("pla"), "PLA", 8)],
                    supplies: vec![],
                    print_minutes: 20,
                    max_batch_size: cap,
                },
                PrintJob {
                    parts: vec![ItemQuantity::new(pid("part-base"), "Base", 1)],
                    filaments: vec![ItemQuantity::new(pid("pla"), "PLA", 12)],
                    supplies: vec![],
                    print_minutes: 25,
                    max_batch_size: cap,
                },
            ],
            _ => vec![PrintJob {
                parts: vec![ItemQuantity::new(pid(&format!("{id}-part")), "Body", 1)],
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

    pub(crate) fn model_node(id: &str, quantity: u32, pieces: Vec<ProductNode>) -> ProductNode {
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

    pub(crate) fn kit_node(id: &str, quantity: u32, components: Vec<ProductNode>) -> ProductNode {
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

    pub(crate) fn test_order(number: u64, products: Vec<ProductNode>) -> Order {
        Order::new(OrderId::new(), number, products, Utc::now())
    }

    fn kit_model_two_pieces(kind: PieceKind) -> Order {
        test_order(
            7,
            vec![kit_node(
                "kit3",
                1,
                vec![model_node("model5", 1, vec![piece_node("piece9", 2, kind, Some(5))])],
            )],
        )
    }

    fn count(explosion: &Explosion, t: ProductType) -> usize {
        explosion.instances.iter().filter(|i| i.product_type() == t).count()
    }

    #[test]
    fn kit_with_assembled_pieces_yields_four_groups() {
        let order = kit_model_two_pieces(PieceKind::CompositeMultiPrint);
        let explosion = explode(&order, Utc::now()).unwrap();

        assert_eq!(count(&explosion, ProductType::Kit), 1);
        assert_eq!(count(&explosion, ProductType::Model), 1);
        assert_eq!(count(&explosion, ProductType::Piece), 2);
        assert_eq!(explosion.groups.len(), 4);

        let tree = &explosion.packaging.required_products;
        assert_eq!(tree.len(), 1);
        assert_eq!(tree[0].product_type, ProductType::Kit);
        assert_eq!(tree[0].quantity, 1);
        assert_eq!(tree[0].children[0].product_type, ProductType::Model);
        assert_eq!(tree[0].children[0].children[0].quantity, 2);
        assert_eq!(explosion.packaging.kind, GroupKind::Packaging);

        // Two jobs per multi-print piece, one unit each.
        assert_eq!(explosion.demands.len(), 4);
    }

    #[test]
    fn simple_pieces_get_no_group() {
        let order = kit_model_two_pieces(PieceKind::Simple);
        let explosion = explode(&order, Utc::now()).unwrap();
        assert_eq!(explosion.groups.len(), 2);
        assert!(explosion.groups.iter().all(|g| g.kind != GroupKind::Piece));
        assert_eq!(explosion.demands.len(), 2);
    }

    #[test]
    fn group_components_follow_the_node() {
        let order = kit_model_two_pieces(PieceKind::CompositeMultiPrint);
        let explosion = explode(&order, Utc::now()).unwrap();

        let model = explosion.groups.iter().find(|g| g.kind == GroupKind::Model).unwrap();
        assert_eq!(model.required_pieces.len(), 1);
        assert_eq!(model.required_pieces[0].quantity, 2);

        let piece = explosion.groups.iter().find(|g| g.kind == GroupKind::Piece).unwrap();
        let parts: Vec<_> = piece.required_parts.iter().map(|p| p.product_id.as_str()).collect();
        assert_eq!(parts, vec!["part-top", "part-base"]);

        let kit = explosion.groups.iter().find(|g| g.kind == GroupKind::Kit).unwrap();
        assert_eq!(kit.required_models.len(), 1);
        assert!(kit.required_pieces.is_empty());
    }

    #[test]
    fn ids_follow_the_tree() {
        let order = kit_model_two_pieces(PieceKind::Simple);
        let explosion = explode(&order, Utc::now()).unwrap();
        let ids: Vec<String> = explosion.instances.iter().map(|i| i.id.to_string()).collect();
        let o = order.id;
        assert_eq!(
            ids,
            vec![
                format!("{o}-kit3-1"),
                format!("{o}-kit3-1-model5-1"),
                format!("{o}-kit3-1-model5-1-piece9-1"),
                format!("{o}-kit3-1-model5-1-piece9-2"),
            ]
        );
    }

    #[test]
    fn repeated_siblings_continue_indexing() {
        let order = test_order(
            1,
            vec![
                piece_node("piece9", 2, PieceKind::Simple, None),
                piece_node("piece9", 1, PieceKind::Simple, None),
            ],
        );
        let explosion = explode(&order, Utc::now()).unwrap();
        let indexes: Vec<u32> = explosion.instances.iter().map(|i| i.path.leaf().index).collect();
        assert_eq!(indexes, vec![1, 2, 3]);

        let tree = &explosion.packaging.required_products;
        assert_eq!(tree.len(), 1);
        assert_eq!(tree[0].quantity, 3);
    }

    #[test]
    fn declared_parts_become_instances_under_their_piece() {
        let mut piece = piece_node("piece9", 2, PieceKind::CompositeMultiPrint, None);
        piece.components = vec![ProductNode {
            product_id: pid("part-top"),
            product_type: ProductType::Part,
            name: "Top".into(),
            quantity: 2,
            piece_kind: None,
            print_jobs: vec![],
            components: vec![],
        }];
        let order = test_order(1, vec![model_node("model5", 1, vec![piece])]);
        let explosion = explode(&order, Utc::now()).unwrap();

        let parts: Vec<&AssemblyInstance> = explosion
            .instances
            .iter()
            .filter(|i| i.product_type() == ProductType::Part)
            .collect();
        assert_eq!(parts.len(), 4);
        let o = order.id;
        assert_eq!(parts[0].id.to_string(), format!("{o}-model5-1-piece9-1-part-top-1"));
        assert_eq!(parts[1].id.to_string(), format!("{o}-model5-1-piece9-1-part-top-2"));
        for part in &parts {
            assert_eq!(part.required_quantity, 1);
            let parent = part.path.parent().unwrap();
            assert_eq!(parent.product_type(), ProductType::Piece);
            assert_eq!(part.parent_model_id, Some(pid("model5")));
        }

        // Parts get no group, no print demand and no packaging entry.
        assert_eq!(explosion.groups.len(), 3);
        assert_eq!(explosion.demands.len(), 4);
        let pieces = &explosion.packaging.required_products[0].children[0];
        assert_eq!(pieces.product_type, ProductType::Piece);
        assert!(pieces.children.is_empty());
        let piece_group = explosion.groups.iter().find(|g| g.kind == GroupKind::Piece).unwrap();
        assert_eq!(piece_group.required_parts[0].quantity, 2);
    }

    #[test]
    fn invalid_order_aborts_before_deriving_anything() {
        let mut bad = piece_node("piece9", 1, PieceKind::Simple, None);
        bad.piece_kind = None;
        let order = test_order(1, vec![bad]);
        assert!(explode(&order, Utc::now()).is_err());
    }

    #[test]
    fn nested_instances_record_ancestor_products() {
        let order = kit_model_two_pieces(PieceKind::Simple);
        let explosion = explode(&order, Utc::now()).unwrap();
        let piece = explosion
            .instances
            .iter()
            .find(|i| i.product_type() == ProductType::Piece)
            .unwrap();
        assert_eq!(piece.parent_kit_id, Some(pid("kit3")));
        assert_eq!(piece.parent_model_id, Some(pid("model5")));
    }
}
