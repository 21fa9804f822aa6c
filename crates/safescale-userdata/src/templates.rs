//! Raw Handlebars source for the five provisioning phases (spec §4.7).
//! The exact contents of cloud-init scripts are explicitly out of scope
//! (spec §1); these are representative skeletons carrying the fields
//! `Content` actually threads through (library sourcing, header mode, DNS,
//! gateway IPs, tag markers) rather than a faithful port of any concrete
//! bootstrap script.

pub const PHASE1_INIT: &str = r#"#!/bin/bash
{{script_header}}

{{bash_library}}

echo "phase1: provisioning {{host_name}} on {{provider_name}}"
mkdir -p /opt/safescale/var/state /opt/safescale/var/log

cat > /etc/ssh/authorized_keys.d/safescale <<'EOF'
{{public_key}}
EOF

useradd -m -s /bin/bash {{default_user}} || true
install -d -m 0700 -o {{default_user}} /home/{{default_user}}/.ssh
install -m 0600 -o {{default_user}} /etc/ssh/authorized_keys.d/safescale /home/{{default_user}}/.ssh/authorized_keys

#insert_phase1_extra

echo "$(cat /etc/os-release | grep ^ID= | cut -d= -f2),unknown,unknown" > /opt/safescale/var/state/phase1.status
touch /opt/safescale/var/state/user_data.phase1.done
"#;

pub const PHASE2_NETWORK_AND_SECURITY: &str = r#"#!/bin/bash
{{script_header}}

{{bash_library}}

echo "phase2: network and security for {{host_name}}"
{{#each dns_servers}}
echo "nameserver {{this}}" >> /etc/resolv.conf
{{/each}}

ip route replace default via {{default_route_ip}} || true
echo "{{cidr}}" > /opt/safescale/var/state/subnet_cidr

#insert_phase2_extra

touch /opt/safescale/var/state/user_data.phase2.done
"#;

pub const PHASE3_GATEWAY_HIGH_AVAILABILITY: &str = r#"#!/bin/bash
{{script_header}}

{{bash_library}}

echo "phase3: gateway HA for {{host_name}}"
{{#if primary_gateway_ip}}
echo "primary gateway: {{primary_gateway_ip}}" >> /opt/safescale/var/log/gateway.log
{{/if}}
{{#if secondary_gateway_ip}}
echo "secondary gateway: {{secondary_gateway_ip}}" >> /opt/safescale/var/log/gateway.log
{{/if}}
{{#if emulated_public_net}}
ip addr add {{emulated_public_net}} dev eth0 label eth0:pub || true
{{/if}}

#insert_phase3_extra

touch /opt/safescale/var/state/user_data.phase3.done
"#;

pub const PHASE4_SYSTEM_FIXES: &str = r#"#!/bin/bash
{{script_header}}

{{bash_library}}

echo "phase4: system fixes for {{host_name}}"
sed -i 's/^#DNS=.*/DNS={{endpoint_ip}}/' /etc/systemd/resolved.conf || true
systemctl restart systemd-resolved 2>/dev/null || true

#insert_phase4_extra

touch /opt/safescale/var/state/user_data.phase4.done
"#;

pub const PHASE5_FINAL: &str = r#"#!/bin/bash
{{script_header}}

{{bash_library}}

echo "phase5: final checks for {{host_name}}"
timeout {{operation_timeout_secs}} systemctl is-system-running --wait || true
sleep {{operation_delay_secs}}

#insert_phase5_extra

touch /opt/safescale/var/state/user_data.phase5.done
"#;
