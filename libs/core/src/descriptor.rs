use std::sync::Arc;

use crate::message::{Message, MessageType};

/// Describes one method: its names and declared request/response types
#[derive(Debug)]
pub struct MethodDescriptor {
    name: String,
    full_name: String,
    service_name: String,
    index: usize,
    request_type: MessageType,
    response_type: MessageType,
}

impl MethodDescriptor {
    /// Short method name, e.g. `Echo`
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Qualified name carried on the wire, e.g. `echo.EchoService.Echo`
    pub fn full_name(&self) -> &str {
        &self.full_name
    }

    /// Qualified name of the owning service
    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// Position of the method within its service
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn request_type(&self) -> MessageType {
        self.request_type
    }

    pub fn response_type(&self) -> MessageType {
        self.response_type
    }
}

/// Describes a service and enumerates its methods
#[derive(Debug)]
pub struct ServiceDescriptor {
    full_name: String,
    methods: Vec<Arc<MethodDescriptor>>,
}

impl ServiceDescriptor {
    pub fn builder(full_name: impl Into<String>) -> ServiceDescriptorBuilder {
        ServiceDescriptorBuilder::new(full_name)
    }

    pub fn full_name(&self) -> &str {
        &self.full_name
    }

    /// Last segment of the qualified name
    pub fn name(&self) -> &str {
        self.full_name
            .rsplit_once('.')
            .map_or(self.full_name.as_str(), |(_, name)| name)
    }

    pub fn methods(&self) -> &[Arc<MethodDescriptor>] {
        &self.methods
    }

    /// Find a method by its short name
    pub fn method(&self, name: &str) -> Option<&Arc<MethodDescriptor>> {
        self.methods.iter().find(|method| method.name == name)
    }
}

/// Builder for [`ServiceDescriptor`]
pub struct ServiceDescriptorBuilder {
    full_name: String,
    methods: Vec<(String, MessageType, MessageType)>,
}

impl ServiceDescriptorBuilder {
    pub fn new(full_name: impl Into<String>) -> Self {
        Self {
            full_name: full_name.into(),
            methods: Vec::new(),
        }
    }

    /// Declare a method with its request and response types
    pub fn method<Req: Message, Resp: Message>(self, name: impl Into<String>) -> Self {
        self.method_with_types(name, MessageType::of::<Req>(), MessageType::of::<Resp>())
    }

    pub fn method_with_types(
        mut self,
        name: impl Into<String>,
        request_type: MessageType,
        response_type: MessageType,
    ) -> Self {
        let name = name.into();
        debug_assert!(
            !self.methods.iter().any(|(existing, _, _)| *existing == name),
            "duplicate method {name} on {}",
            self.full_name
        );
        self.methods.push((name, request_type, response_type));
        self
    }

    pub fn build(self) -> Arc<ServiceDescriptor> {
        let full_name = self.full_name;
        let methods = self
            .methods
            .into_iter()
            .enumerate()
            .map(|(index, (name, request_type, response_type))| {
                Arc::new(MethodDescriptor {
                    full_name: format!("{full_name}.{name}"),
                    service_name: full_name.clone(),
                    name,
                    index,
                    request_type,
                    response_type,
                })
            })
            .collect();

        Arc::new(ServiceDescriptor { full_name, methods })
    }
}
