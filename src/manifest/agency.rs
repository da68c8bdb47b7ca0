pub const AGENCY_MANIFEST: &str = r#"
#
# Built-in manifest for the agency app
#
# 0005_cost introduces the agency_cost table together with its two indexes.
# 0010_userprofile_is_project_manager adds a flag column to user profiles and
# marks leadership and account staff as project managers once the column exists.
# 0010_alter_monthlycost was generated for the removed MonthlyCost model and
# later discarded, but databases that ran it still carry the ledger row.
#

app = "agency"
retired = ["0010_alter_monthlycost"]

[[migrations]]
name = "0005_cost"

[migrations.target]
kind = "table"
name = "agency_cost"
columns = [
    "id", "name", "cost_type", "description", "amount", "frequency",
    "start_date", "end_date", "is_contractor", "vendor", "is_billable",
    "is_active", "created_at", "company_id", "project_id",
]
create_sql = """
CREATE TABLE agency_cost (
    id VARCHAR(36) PRIMARY KEY,
    name VARCHAR(200) NOT NULL,
    cost_type VARCHAR(20) NOT NULL,
    description TEXT,
    amount DECIMAL(10, 2) NOT NULL,
    frequency VARCHAR(20) DEFAULT 'monthly',
    start_date DATE NOT NULL,
    end_date DATE,
    is_contractor BOOLEAN DEFAULT 0,
    vendor VARCHAR(200),
    is_billable BOOLEAN DEFAULT 0,
    is_active BOOLEAN DEFAULT 1,
    created_at DATETIME NOT NULL,
    company_id VARCHAR(36) NOT NULL,
    project_id VARCHAR(36),
    FOREIGN KEY (company_id) REFERENCES agency_company(id),
    FOREIGN KEY (project_id) REFERENCES agency_project(id)
)
"""

[[migrations.target.indexes]]
name = "agency_cost_company_start_idx"
sql = "CREATE INDEX agency_cost_company_start_idx ON agency_cost (company_id, start_date)"

[[migrations.target.indexes]]
name = "agency_cost_type_contractor_idx"
sql = "CREATE INDEX agency_cost_type_contractor_idx ON agency_cost (cost_type, is_contractor)"

[[migrations]]
name = "0010_userprofile_is_project_manager"
backfill = [
    "UPDATE agency_userprofile SET is_project_manager = 1 WHERE role IN ('leadership', 'account')",
]

[migrations.target]
kind = "column"
table = "agency_userprofile"
column = "is_project_manager"
definition = "BOOLEAN DEFAULT 0 NOT NULL"
"#;
