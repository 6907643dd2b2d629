use crate::{
    namespace::SharedNamespaceIndex,
    rbac::{
        SharedRbacIndex, KIND_CLUSTER_ROLE, KIND_CLUSTER_ROLE_BINDING, KIND_ROLE,
        KIND_ROLE_BINDING,
    },
};
use prometheus_client::{
    collector::Collector,
    encoding::{DescriptorEncoder, EncodeMetric},
    metrics::{gauge::ConstGauge, MetricType},
    registry::Registry,
};

#[derive(Debug)]
struct Instrumented {
    namespaces: SharedNamespaceIndex,
    rbac: SharedRbacIndex,
}

pub fn register(reg: &mut Registry, namespaces: SharedNamespaceIndex, rbac: SharedRbacIndex) {
    reg.register_collector(Box::new(Instrumented { namespaces, rbac }));
}

impl Collector for Instrumented {
    fn encode(&self, mut encoder: DescriptorEncoder<'_>) -> Result<(), std::fmt::Error> {
        let namespaces = ConstGauge::new(self.namespaces.read().len() as u32);
        let namespaces_encoder = encoder.encode_descriptor(
            "namespace_index_size",
            "The number of namespaces in index",
            None,
            MetricType::Gauge,
        )?;
        namespaces.encode(namespaces_encoder)?;

        let rbac = self.rbac.read();
        let mut rbac_encoder = encoder.encode_descriptor(
            "rbac_index_size",
            "The number of RBAC resources in index",
            None,
            MetricType::Gauge,
        )?;
        for kind in [
            KIND_ROLE,
            KIND_ROLE_BINDING,
            KIND_CLUSTER_ROLE,
            KIND_CLUSTER_ROLE_BINDING,
        ] {
            let labels = [("kind", kind)];
            let size = ConstGauge::new(rbac.size(kind) as u32);
            let size_encoder = rbac_encoder.encode_family(&labels)?;
            size.encode(size_encoder)?;
        }
        Ok(())
    }
}
