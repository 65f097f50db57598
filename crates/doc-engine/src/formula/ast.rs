use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

/// Parsed formula expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Text(String),
    Bool(bool),
    Null,
    /// Field or lambda parameter followed by property segments, e.g.
    /// `products.0.price`.
    Reference(Vec<String>),
    Array(Vec<Expr>),
    Object(Vec<(String, Expr)>),
    Unary {
        op: UnaryOp,
        expr: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Call {
        name: String,
        args: Vec<Expr>,
    },
    Lambda {
        params: Vec<String>,
        body: Box<Expr>,
    },
    Index {
        target: Box<Expr>,
        index: Box<Expr>,
    },
    Member {
        target: Box<Expr>,
        name: String,
    },
}

impl Expr {
    /// Names referenced as operands anywhere in the expression, however deeply
    /// nested in calls, literals or lambdas. Lambda parameters are excluded
    /// inside their own bodies.
    pub fn references(&self) -> BTreeSet<String> {
        let mut names = BTreeSet::new();
        let mut bound = Vec::new();
        collect_references(self, &mut bound, &mut names);
        names
    }

    /// Number of nodes on the longest root-to-leaf path. Walks with an
    /// explicit stack so arbitrarily deep trees cannot overflow.
    pub fn height(&self) -> usize {
        let mut tallest = 0;
        let mut pending = vec![(self, 1)];
        while let Some((node, level)) = pending.pop() {
            tallest = tallest.max(level);
            let children: Vec<&Expr> = match node {
                Expr::Number(_) | Expr::Text(_) | Expr::Bool(_) | Expr::Null | Expr::Reference(_) => {
                    Vec::new()
                }
                Expr::Array(items) | Expr::Call { args: items, .. } => items.iter().collect(),
                Expr::Object(entries) => entries.iter().map(|(_, value)| value).collect(),
                Expr::Unary { expr, .. } => vec![expr.as_ref()],
                Expr::Binary { left, right, .. } => vec![left.as_ref(), right.as_ref()],
                Expr::Lambda { body, .. } => vec![body.as_ref()],
                Expr::Index { target, index } => vec![target.as_ref(), index.as_ref()],
                Expr::Member { target, .. } => vec![target.as_ref()],
            };
            pending.extend(children.into_iter().map(|child| (child, level + 1)));
        }
        tallest
    }
}

fn collect_references(expr: &Expr, bound: &mut Vec<String>, names: &mut BTreeSet<String>) {
    match expr {
        Expr::Number(_) | Expr::Text(_) | Expr::Bool(_) | Expr::Null => {}
        Expr::Reference(path) => {
            if let Some(head) = path.first()
                && !bound.contains(head)
            {
                names.insert(head.clone());
            }
        }
        Expr::Array(items) => {
            for item in items {
                collect_references(item, bound, names);
            }
        }
        Expr::Object(entries) => {
            for (_, value) in entries {
                collect_references(value, bound, names);
            }
        }
        Expr::Unary { expr, .. } => collect_references(expr, bound, names),
        Expr::Binary { left, right, .. } => {
            collect_references(left, bound, names);
            collect_references(right, bound, names);
        }
        Expr::Call { args, .. } => {
            for arg in args {
                collect_references(arg, bound, names);
            }
        }
        Expr::Lambda { params, body } => {
            let depth = bound.len();
            bound.extend(params.iter().cloned());
            collect_references(body, bound, names);
            bound.truncate(depth);
        }
        Expr::Index { target, index } => {
            collect_references(target, bound, names);
            collect_references(index, bound, names);
        }
        Expr::Member { target, .. } => collect_references(target, bound, names),
    }
}
