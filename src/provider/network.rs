//! Built-in network topology resource types.
//!
//! A VPC with subnets, an internet gateway, elastic IPs, NAT gateways,
//! route tables, routes and route table associations.

use crate::config::TypeConstraint;

use super::schema::{AttributeSchema, ResourceSchema};

fn tags() -> AttributeSchema {
    AttributeSchema::optional(TypeConstraint::map(TypeConstraint::String))
}

fn id() -> AttributeSchema {
    AttributeSchema::read_only(TypeConstraint::String)
}

fn owner_id() -> AttributeSchema {
    AttributeSchema::read_only(TypeConstraint::String).stable()
}

/// Returns the schemas of every network resource type.
#[must_use]
pub fn network_schemas() -> Vec<ResourceSchema> {
    vec![
        ResourceSchema::new("vpc")
            .attribute("cidr_block", AttributeSchema::required(TypeConstraint::String).force_new())
            .attribute("enable_dns_support", AttributeSchema::optional(TypeConstraint::Bool))
            .attribute("enable_dns_hostnames", AttributeSchema::optional(TypeConstraint::Bool))
            .attribute(
                "instance_tenancy",
                AttributeSchema::optional(TypeConstraint::String).force_new(),
            )
            .attribute("tags", tags())
            .attribute("id", id())
            .attribute("arn", id())
            .attribute("default_route_table_id", id())
            .attribute("owner_id", owner_id()),
        ResourceSchema::new("subnet")
            .attribute("vpc_id", AttributeSchema::required(TypeConstraint::String).force_new())
            .attribute("cidr_block", AttributeSchema::required(TypeConstraint::String).force_new())
            .attribute(
                "availability_zone",
                AttributeSchema::optional(TypeConstraint::String)
                    .computed()
                    .force_new()
                    .stable(),
            )
            .attribute("map_public_ip_on_launch", AttributeSchema::optional(TypeConstraint::Bool))
            .attribute("tags", tags())
            .attribute("id", id())
            .attribute("arn", id())
            .attribute("owner_id", owner_id()),
        ResourceSchema::new("internet_gateway")
            .attribute("vpc_id", AttributeSchema::optional(TypeConstraint::String))
            .attribute("tags", tags())
            .attribute("id", id())
            .attribute("arn", id())
            .attribute("owner_id", owner_id()),
        ResourceSchema::new("eip")
            .attribute("domain", AttributeSchema::optional(TypeConstraint::String).force_new())
            .attribute("tags", tags())
            .attribute("id", id())
            .attribute("allocation_id", id())
            .attribute("public_ip", id()),
        ResourceSchema::new("nat_gateway")
            .attribute("allocation_id", AttributeSchema::required(TypeConstraint::String).force_new())
            .attribute("subnet_id", AttributeSchema::required(TypeConstraint::String).force_new())
            .attribute(
                "connectivity_type",
                AttributeSchema::optional(TypeConstraint::String).force_new(),
            )
            .attribute("tags", tags())
            .attribute("id", id())
            .attribute("public_ip", id())
            .attribute("private_ip", id()),
        ResourceSchema::new("route_table")
            .attribute("vpc_id", AttributeSchema::required(TypeConstraint::String).force_new())
            .attribute("tags", tags())
            .attribute("id", id())
            .attribute("arn", id())
            .attribute("owner_id", owner_id()),
        ResourceSchema::new("route")
            .attribute(
                "route_table_id",
                AttributeSchema::required(TypeConstraint::String).force_new(),
            )
            .attribute(
                "destination_cidr_block",
                AttributeSchema::required(TypeConstraint::String).force_new(),
            )
            .attribute("gateway_id", AttributeSchema::optional(TypeConstraint::String))
            .attribute("nat_gateway_id", AttributeSchema::optional(TypeConstraint::String))
            .attribute("id", id()),
        ResourceSchema::new("route_table_association")
            .attribute("subnet_id", AttributeSchema::required(TypeConstraint::String).force_new())
            .attribute("route_table_id", AttributeSchema::required(TypeConstraint::String))
            .attribute("id", id()),
    ]
}

/// Identity prefix of a resource type.
#[must_use]
pub fn identity_prefix(resource_type: &str) -> &str {
    match resource_type {
        "internet_gateway" => "igw",
        "eip" => "eipalloc",
        "nat_gateway" => "nat",
        "route_table" => "rtb",
        "route" => "r",
        "route_table_association" => "rtbassoc",
        other => other,
    }
}

/// Resource type an identity-valued attribute must point at, if any.
#[must_use]
pub fn referenced_type(resource_type: &str, attribute: &str) -> Option<&'static str> {
    match (resource_type, attribute) {
        ("subnet" | "internet_gateway" | "route_table", "vpc_id") => Some("vpc"),
        ("nat_gateway", "allocation_id") => Some("eip"),
        ("nat_gateway" | "route_table_association", "subnet_id") => Some("subnet"),
        ("route" | "route_table_association", "route_table_id") => Some("route_table"),
        ("route", "gateway_id") => Some("internet_gateway"),
        ("route", "nat_gateway_id") => Some("nat_gateway"),
        _ => None,
    }
}

/// Attributes holding a CIDR block.
#[must_use]
pub fn is_cidr_attribute(attribute: &str) -> bool {
    matches!(attribute, "cidr_block" | "destination_cidr_block")
}
